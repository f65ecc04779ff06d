use control_api::Coordinator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: Coordinator,
    pub(crate) max_body_bytes: usize,
}
