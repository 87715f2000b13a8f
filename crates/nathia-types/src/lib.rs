/// Shared data model for the NathIA chat service.
///
/// Everything that crosses a crate boundary lives here: the risk and
/// moderation vocabulary, persisted chat turns, user profiles and the HTTP
/// request/response bodies.
pub mod api;
pub mod models;
pub mod risk;
