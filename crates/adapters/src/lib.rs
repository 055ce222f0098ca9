mod base_url;
mod error;
mod llm;

pub use base_url::normalize_base_url;
pub use error::{status_failure_kind, AdapterError};
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile};
