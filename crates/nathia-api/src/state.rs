use std::sync::Arc;

use nathia_db::Database;

use crate::pipeline::ChatPipeline;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub pipeline: Arc<ChatPipeline>,
}
