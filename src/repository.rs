//! Directory repository scanner
//!
//! Bulk-loads a file tree into the engine: handler-named files become
//! [`ScriptHandler`]s, every other file becomes a resource described by its
//! YAML body, and directories become container resources so files nest
//! under them. The whole walk runs between `suspend_events` and
//! `resume_events` so activation cascades only begin once the full tree is
//! known.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::dispatch::Dispatcher;
use crate::errors::EngineResult;
use crate::event::Payload;
use crate::handlers::ScriptHandler;
use crate::registry::{Registry, ROOT_NAME};
use crate::resource::{BehaviorSpec, Resource, ResourceRef};

/// Resource descriptor file body. All keys optional; file-derived defaults
/// apply otherwise.
#[derive(Debug, Deserialize, Default)]
struct Descriptor {
    #[serde(rename = "type")]
    resource_type: Option<String>,
    name: Option<String>,
    desc: Option<Payload>,
    behavior: Option<BehaviorField>,
}

/// `behavior:` accepts a bare factory name, one spec, or a list of specs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BehaviorField {
    Name(String),
    One(BehaviorSpec),
    Many(Vec<BehaviorSpec>),
}

impl BehaviorField {
    fn into_specs(self) -> Vec<BehaviorSpec> {
        match self {
            Self::Name(name) => vec![BehaviorSpec::named(name)],
            Self::One(spec) => vec![spec],
            Self::Many(specs) => specs,
        }
    }
}

/// Walks a file tree, loading resources and handlers into the engine
pub struct RepositoryScanner {
    bus: Arc<EventBus>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
}

impl RepositoryScanner {
    /// Create a scanner feeding the given registry and dispatcher
    pub fn new(bus: Arc<EventBus>, registry: Arc<Registry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            bus,
            registry,
            dispatcher,
        }
    }

    /// Scan `path` recursively, suspending events for the duration so the
    /// batch is delivered in one resume.
    pub fn scan(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        info!(path = ?path, "scanning repository");
        self.bus.suspend_events();
        let result = self.walk(path, ROOT_NAME);
        self.bus.resume_events();
        result
    }

    fn walk(&self, dir: &Path, parent_name: &str) -> EngineResult<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        // Deterministic load order
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                warn!(path = ?path, "skipping entry with unreadable name");
                continue;
            };

            if path.is_dir() {
                let container = Resource::new(file_name, "directory")
                    .with_parent_name(parent_name)
                    .into_ref();
                let container_name = container.name().to_string();
                self.registry.add_resource(container);
                self.walk(&path, &container_name)?;
            } else if ScriptHandler::is_handler_file(file_name) {
                match ScriptHandler::from_path(&path) {
                    Ok(handler) => self.dispatcher.register_handler(Arc::new(handler)),
                    Err(err) => warn!(path = ?path, error = %err, "skipping handler file"),
                }
            } else {
                let resource = self.load_resource(&path, file_name, parent_name);
                self.registry.add_resource(resource);
            }
        }
        Ok(())
    }

    /// Build a resource from a descriptor file. The file stem and extension
    /// provide defaults; the YAML body may override `type` and `name` and
    /// supply `desc` and `behavior`.
    fn load_resource(&self, path: &Path, file_name: &str, parent_name: &str) -> ResourceRef {
        let (default_name, default_type) = match file_name.rsplit_once('.') {
            Some((stem, extension)) => (stem.to_string(), extension.to_string()),
            None => (file_name.to_string(), String::new()),
        };

        let descriptor = match Self::read_descriptor(path) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(path = ?path, error = %err, "bad descriptor, using file-derived defaults");
                Descriptor::default()
            }
        };

        let mut resource = Resource::new(
            descriptor.name.unwrap_or(default_name),
            descriptor.resource_type.unwrap_or(default_type),
        )
        .with_parent_name(parent_name);

        if let Some(desc) = descriptor.desc {
            resource = resource.with_description(desc);
        }
        if let Some(behavior) = descriptor.behavior {
            for spec in behavior.into_specs() {
                resource = resource.with_behavior(spec);
            }
        }
        resource.into_ref()
    }

    fn read_descriptor(path: &Path) -> EngineResult<Descriptor> {
        let body = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceState;
    use pretty_assertions::assert_eq;

    fn scanner() -> (Arc<EventBus>, Arc<Registry>, Arc<Dispatcher>, RepositoryScanner) {
        let bus = Arc::new(EventBus::new());
        let registry = Registry::new(bus.clone());
        let dispatcher = Dispatcher::install(bus.clone());
        let scanner = RepositoryScanner::new(bus.clone(), registry.clone(), dispatcher.clone());
        (bus, registry, dispatcher, scanner)
    }

    #[test]
    fn test_scan_builds_tree_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("queues")).unwrap();
        std::fs::write(
            dir.path().join("queues/changes.sqs"),
            "desc:\n  region: ap-southeast-2\n  queueName: changes\n",
        )
        .unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        let queues = registry.get_resource("queues").expect("directory resource");
        assert_eq!(queues.resource_type(), "directory");

        let changes = registry.get_resource("changes").expect("file resource");
        assert_eq!(changes.resource_type(), "sqs");
        assert_eq!(
            changes.description()["region"],
            serde_json::json!("ap-southeast-2")
        );
        assert_eq!(changes.parent_resource().unwrap().name(), "queues");
    }

    #[test]
    fn test_scan_activates_after_resume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q1.sqs"), "desc:\n  queueName: q1\n").unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        // Root was active before the scan, so the batch activates on resume
        let q1 = registry.get_resource("q1").unwrap();
        assert_eq!(q1.state(), ResourceState::Activated);
    }

    #[test]
    fn test_descriptor_overrides_name_and_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("something.yaml"),
            "type: sqs\nname: renamed\n",
        )
        .unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        assert!(registry.get_resource("something").is_none());
        let renamed = registry.get_resource("renamed").unwrap();
        assert_eq!(renamed.resource_type(), "sqs");
    }

    #[test]
    fn test_handler_files_become_script_handlers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("on.GitChanged.sh"), "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::write(dir.path().join("q1.sqs"), "").unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        // The handler file did not become a resource
        assert!(registry.get_resource("on").is_none());
        assert!(registry.get_resource("on.GitChanged").is_none());
        assert!(registry.get_resource("q1").is_some());
    }

    #[test]
    fn test_malformed_descriptor_falls_back_to_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q1.sqs"), "{ this is not yaml\n").unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        let q1 = registry.get_resource("q1").expect("resource still loaded");
        assert_eq!(q1.resource_type(), "sqs");
    }

    #[test]
    fn test_behavior_string_form() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("i1.ec2instance"), "behavior: ec2driver\n").unwrap();

        let (_bus, registry, _dispatcher, scanner) = scanner();
        registry.start();
        scanner.scan(dir.path()).unwrap();

        let i1 = registry.get_resource("i1").unwrap();
        assert_eq!(i1.behavior().len(), 1);
        assert_eq!(i1.behavior()[0].name, "ec2driver");
    }
}
