//! Command routing modules
//!
//! - session_routes: session and consultation commands

pub mod session_routes;

use serde_json::Value;

use super::ServerAppState;

// =============================================================================
// Helper functions for use by route modules
// =============================================================================

/// Extract a required argument from JSON args
pub fn get_arg<T: serde::de::DeserializeOwned>(args: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(
        args.get(name)
            .ok_or_else(|| format!("Missing argument: {}", name))?
            .clone(),
    )
    .map_err(|e| format!("Invalid argument {}: {}", name, e))
}

/// Extract an optional argument from JSON args
pub fn get_opt_arg<T: serde::de::DeserializeOwned>(
    args: &Value,
    name: &str,
) -> Result<Option<T>, String> {
    match args.get(name) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| format!("Invalid argument {}: {}", name, e)),
        _ => Ok(None),
    }
}

// =============================================================================
// Command Routing Macros
// =============================================================================

/// Routes a simple async command: awaits the handler, serializes the result
#[macro_export]
macro_rules! route_async {
    ($cmd:expr, $handler:expr) => {{
        let result = $handler.await?;
        serde_json::to_value(result).map_err(|e| e.to_string())
    }};
}

pub use route_async;

// =============================================================================
// Main Command Dispatcher
// =============================================================================

/// Route a command to its implementation by dispatching to the appropriate sub-router
pub async fn route_command(
    cmd: &str,
    args: Value,
    state: &ServerAppState,
) -> Result<Value, String> {
    if session_routes::is_session_command(cmd) {
        return session_routes::route_session_command(cmd, args, state).await;
    }

    Err(format!("Unknown command: {}", cmd))
}

pub use super::proxy::start_consultation_server;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_arg() {
        let args = json!({"id": "s-1"});
        let id: String = get_arg(&args, "id").unwrap();
        assert_eq!(id, "s-1");

        let err = get_arg::<String>(&args, "sessionId").unwrap_err();
        assert_eq!(err, "Missing argument: sessionId");

        let err = get_arg::<u32>(&args, "id").unwrap_err();
        assert!(err.starts_with("Invalid argument id"));
    }

    #[test]
    fn test_get_opt_arg_treats_null_as_absent() {
        let args = json!({"userId": null});
        let user: Option<String> = get_opt_arg(&args, "userId").unwrap();
        assert!(user.is_none());

        let args = json!({"userId": "u-1"});
        let user: Option<String> = get_opt_arg(&args, "userId").unwrap();
        assert_eq!(user.as_deref(), Some("u-1"));
    }
}
