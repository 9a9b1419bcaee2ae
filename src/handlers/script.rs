//! Script-backed handlers
//!
//! A script handler is discovered from a file whose name encodes its
//! condition: `on.<event>[.<type>[.<name>]].<ext>`, or a reserved action
//! prefix (`run`, `register`, `update`, `delete`, `activate`) in place of
//! `on.<event>`. Runnable files (shebang first line) are executed with the
//! event context in the environment; exit status zero reports success.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::info;

use crate::condition::{Condition, EventCondition, ResourceCondition};
use crate::dispatch::Handler;
use crate::errors::{EngineError, EngineResult};
use crate::event::{EventName, Payload};
use crate::resource::ResourceRef;

const HANDLER_PREFIXES: &[&str] = &["on", "run", "register", "update", "delete", "activate"];

/// Handler backed by an executable file discovered by the directory scanner
pub struct ScriptHandler {
    path: PathBuf,
    condition: EventCondition,
}

impl ScriptHandler {
    /// Whether a file name follows the handler naming convention
    pub fn is_handler_file(file_name: &str) -> bool {
        match file_name.split('.').next() {
            Some(head) => HANDLER_PREFIXES.contains(&head),
            None => false,
        }
    }

    /// Interpret the file name, extracting the event and resource selectors
    pub fn from_path(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EngineError::Descriptor(format!("unreadable file name: {path:?}")))?;

        let parts: Vec<&str> = file_name.split('.').collect();
        // The last segment is the extension; selectors sit between the
        // prefix and it.
        let (event, selectors) = match parts.as_slice() {
            ["on", event, selectors @ ..] if !selectors.is_empty() => {
                (EventName::parse(event), &selectors[..selectors.len() - 1])
            }
            [action, selectors @ ..]
                if HANDLER_PREFIXES.contains(action) && *action != "on" =>
            {
                let trimmed = if selectors.is_empty() {
                    selectors
                } else {
                    &selectors[..selectors.len() - 1]
                };
                (EventName::parse(action), trimmed)
            }
            _ => {
                return Err(EngineError::Descriptor(format!(
                    "not a handler file name: {file_name}"
                )))
            }
        };

        let mut resource = ResourceCondition::default();
        if let Some(resource_type) = selectors.first() {
            resource.resource_type = Some(resource_type.to_string());
        }
        if let Some(resource_name) = selectors.get(1) {
            resource.resource_name = Some(resource_name.to_string());
        }

        Ok(Self {
            path,
            condition: EventCondition::new(event, resource),
        })
    }

    /// The file backing this handler
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The event this handler fires on
    pub fn event(&self) -> &EventName {
        &self.condition.event
    }

    /// Whether the backing file starts with a `#!` interpreter line
    pub fn is_runnable(&self) -> bool {
        let Ok(file) = File::open(&self.path) else {
            return false;
        };
        let mut first_line = String::new();
        if BufReader::new(file).read_line(&mut first_line).is_err() {
            return false;
        }
        first_line.trim_start().starts_with("#!")
    }

    fn execute(&self, resource: &ResourceRef, payload: Option<&Payload>) -> EngineResult<bool> {
        info!(script = ?self.path, resource = %resource, "running script handler");
        let resource_json = serde_json::json!({
            "name": resource.name(),
            "type": resource.resource_type(),
            "description": resource.description(),
        });
        let status = Command::new(&self.path)
            .arg(self.condition.event.as_str())
            .env("EVENT", self.condition.event.as_str())
            .env("RESOURCE", resource_json.to_string())
            .env(
                "PAYLOAD",
                payload.map(|p| p.to_string()).unwrap_or_default(),
            )
            .status()
            .map_err(|err| EngineError::ScriptFailed(format!("{:?}: {err}", self.path)))?;
        Ok(status.success())
    }
}

impl Handler for ScriptHandler {
    fn event_names(&self) -> Vec<EventName> {
        vec![self.condition.event.clone()]
    }

    fn event_condition(&self, event: &EventName) -> Option<Arc<dyn Condition>> {
        (*event == self.condition.event).then(|| Arc::new(self.condition.clone()) as Arc<dyn Condition>)
    }

    fn handle_event(
        &self,
        event: &EventName,
        resource: &ResourceRef,
        payload: Option<&Payload>,
    ) -> EngineResult<bool> {
        if *event != self.condition.event {
            return Ok(true);
        }
        if !self.is_runnable() {
            return Err(EngineError::ScriptFailed(format!(
                "{:?} has no interpreter line",
                self.path
            )));
        }
        self.execute(resource, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("on.GitChanged.sh", true; "on prefix")]
    #[test_case("register.sqs.sh", true; "action prefix")]
    #[test_case("activate.py", true; "bare action")]
    #[test_case("queue.yaml", false; "descriptor file")]
    #[test_case("notes.txt", false; "plain file")]
    fn test_is_handler_file(name: &str, expected: bool) {
        assert_eq!(ScriptHandler::is_handler_file(name), expected);
    }

    #[test]
    fn test_parse_full_selector() {
        let handler = ScriptHandler::from_path("/tmp/on.received.sqs.q1.sh").unwrap();
        assert_eq!(*handler.event(), EventName::Custom("received".into()));
        assert_eq!(handler.condition.resource.resource_type.as_deref(), Some("sqs"));
        assert_eq!(handler.condition.resource.resource_name.as_deref(), Some("q1"));
    }

    #[test]
    fn test_parse_event_only() {
        let handler = ScriptHandler::from_path("/tmp/on.GitChanged.sh").unwrap();
        assert_eq!(*handler.event(), EventName::Custom("GitChanged".into()));
        assert!(handler.condition.resource.resource_type.is_none());
    }

    #[test]
    fn test_parse_action_prefix() {
        let handler = ScriptHandler::from_path("/tmp/register.sqs.sh").unwrap();
        assert_eq!(*handler.event(), EventName::Register);
        assert_eq!(handler.condition.resource.resource_type.as_deref(), Some("sqs"));
    }

    #[test]
    fn test_reject_non_handler_name() {
        assert!(ScriptHandler::from_path("/tmp/queue.yaml").is_err());
    }

    #[test]
    fn test_not_runnable_without_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("on.ping.sh");
        std::fs::write(&path, "echo hello\n").unwrap();
        let handler = ScriptHandler::from_path(&path).unwrap();
        assert!(!handler.is_runnable());
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_script() {
        use crate::resource::Resource;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("on.ping.sh");
        std::fs::write(&path, "#!/bin/sh\ntest \"$EVENT\" = ping\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let handler = ScriptHandler::from_path(&path).unwrap();
        let resource = Resource::new("q1", "sqs").into_ref();
        let result = handler
            .handle_event(&EventName::Custom("ping".into()), &resource, None)
            .unwrap();
        assert!(result);
    }
}
