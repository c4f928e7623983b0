//! Method names the engine routes itself.

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "initialized";
pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";

pub const CANCEL_REQUEST: &str = "$/cancelRequest";
pub const PROGRESS: &str = "$/progress";
pub const SET_TRACE: &str = "$/setTrace";
pub const LOG_TRACE: &str = "$/logTrace";

pub const DID_OPEN: &str = "textDocument/didOpen";
pub const DID_CHANGE: &str = "textDocument/didChange";
pub const DID_SAVE: &str = "textDocument/didSave";
pub const WILL_SAVE: &str = "textDocument/willSave";
pub const WILL_SAVE_WAIT_UNTIL: &str = "textDocument/willSaveWaitUntil";
pub const DID_CLOSE: &str = "textDocument/didClose";

pub const SEMANTIC_TOKENS_FULL: &str = "textDocument/semanticTokens/full";
pub const SEMANTIC_TOKENS_FULL_DELTA: &str = "textDocument/semanticTokens/full/delta";
pub const SEMANTIC_TOKENS_RANGE: &str = "textDocument/semanticTokens/range";

pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
pub const LOG_MESSAGE: &str = "window/logMessage";
pub const SHOW_MESSAGE: &str = "window/showMessage";
pub const WORK_DONE_PROGRESS_CREATE: &str = "window/workDoneProgress/create";
pub const REGISTER_CAPABILITY: &str = "client/registerCapability";
pub const UNREGISTER_CAPABILITY: &str = "client/unregisterCapability";
