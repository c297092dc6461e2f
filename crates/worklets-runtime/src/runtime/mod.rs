pub mod context;
pub mod job_queue;
pub mod json;

mod bindings;
pub(crate) mod js;
pub(crate) mod receiver;


pub use context::Runtime;
pub use job_queue::MicrotaskQueue;
pub use json::{js_object_to_map, js_value_to_json, json_to_js_value};
