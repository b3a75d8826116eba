//! Client configuration: environments, request defaults and transport.

pub mod nodes;
pub mod parser;
pub mod schema;
pub mod store;

pub use nodes::{address_with_peer, select_relay};
pub use parser::{parse_fldist_toml, parse_fldist_toml_str};
pub use schema::{
    BUILTIN_ENVS, DEFAULT_TTL_MS, Environment, FAAS_DEV_ENV, FAAS_NET_HTTPS_ENV, FldistConfig,
    LOCAL_ENV, LOCAL_PEER_ID, STAGE_ENV,
};
pub use store::ConfigStore;
