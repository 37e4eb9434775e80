//! Event names used on the socket.

// Outbound commands.
pub const INIT: &str = "init";
pub const PROCESS_INPUT: &str = "processInput";
pub const INPUT: &str = "input";
pub const RESET_FLOW: &str = "resetFlow";
pub const RESET_STATE: &str = "resetState";
pub const RESET_CONTEXT: &str = "resetContext";
pub const INJECT_CONTEXT: &str = "injectContext";
pub const INJECT_STATE: &str = "injectState";

// Inbound events.
pub const INIT_RESPONSE: &str = "initResponse";
pub const OUTPUT: &str = "output";
pub const ERROR: &str = "error";
pub const EXCEPTION: &str = "exception";
pub const FINAL_PING: &str = "finalPing";
pub const NEW_CONTEXT: &str = "newContext";
pub const NEW_STATE: &str = "newState";
