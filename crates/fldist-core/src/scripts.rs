//! Orchestration scripts for the built-in remote operations.
//!
//! Every script hops through the relay to the target `node`, performs one
//! builtin call there and reports back on `callback.callback`. The text is
//! opaque to this crate; the remote interpreter is authoritative.

/// Wrap a single call on `node` into a relay round trip that reports `result`
/// (or nothing) back to the client.
fn round_trip(call: &str, result: Option<&str>) -> String {
    let reply = match result {
        Some(var) => format!("(call %init_peer_id% (\"callback\" \"callback\") [{var}])"),
        None => "(call %init_peer_id% (\"callback\" \"callback\") [])".to_string(),
    };
    format!(
        r#"
(seq
    (call relay ("op" "identity") [])
    (seq
        {call}
        (seq
            (call relay ("op" "identity") [])
            {reply}
        )
    )
)"#
    )
}

pub fn add_module() -> String {
    round_trip(
        r#"(call node ("dist" "add_module") [module_bytes module_config] result)"#,
        Some("result"),
    )
}

pub fn add_blueprint() -> String {
    round_trip(
        r#"(call node ("dist" "add_blueprint") [blueprint] result)"#,
        Some("result"),
    )
}

pub fn create_service() -> String {
    round_trip(
        r#"(call node ("srv" "create") [blueprint_id] result)"#,
        Some("result"),
    )
}

pub fn add_alias() -> String {
    round_trip(r#"(call node ("srv" "add_alias") [alias service_id])"#, None)
}

pub fn add_script() -> String {
    round_trip(
        r#"(call node ("script" "add") [script interval] result)"#,
        Some("result"),
    )
}

pub fn remove_script() -> String {
    round_trip(r#"(call node ("script" "remove") [script_id])"#, None)
}

pub fn list_modules() -> String {
    round_trip(
        r#"(call node ("dist" "list_modules") [] result)"#,
        Some("result"),
    )
}

pub fn list_services() -> String {
    round_trip(r#"(call node ("srv" "list") [] result)"#, Some("result"))
}

pub fn get_interface() -> String {
    round_trip(
        r#"(call node ("srv" "get_interface") [service_id] result)"#,
        Some("result"),
    )
}
