use std::sync::Arc;

use callflow_core::collaborators::RecordQueries;
use callflow_core::dialogue::DialogueController;

#[derive(Clone)]
pub struct AppState {
    pub dialogue: Arc<DialogueController>,
    pub records: Arc<dyn RecordQueries>,
}
