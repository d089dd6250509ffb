//! In-memory `Group` registry, seeded from `$AGENTFLOW_HOME/groups/*` at
//! startup (spec.md §3/GLOSSARY: "folder is the stable key and filesystem
//! identifier"). No example crate persists chat-workspace metadata this way,
//! so this is new code grounded on the Group/GLOSSARY shape itself rather
//! than a copied registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use agentflow_protocol::{ContainerConfig, Group};
use async_trait::async_trait;
use chrono::Utc;

pub struct GroupRegistryImpl {
    groups: RwLock<HashMap<String, Group>>,
}

fn default_group(folder: &str) -> Group {
    Group {
        name: folder.to_string(),
        folder: folder.to_string(),
        trigger_prefix: "!".to_string(),
        added_at: Utc::now(),
        container_config: ContainerConfig {
            additional_mounts: Vec::new(),
            timeout_ms: None,
        },
        requires_trigger: folder != "main",
    }
}

impl GroupRegistryImpl {
    /// Scans `groups_dir` for one subdirectory per group folder; always
    /// guarantees a `main` entry exists even if the directory is empty or
    /// missing (spec.md GLOSSARY: "main group carries elevated privileges").
    pub fn load_from_disk(groups_dir: &Path) -> Self {
        let mut groups = HashMap::new();
        groups.insert("main".to_string(), default_group("main"));

        if let Ok(entries) = std::fs::read_dir(groups_dir) {
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(folder) = entry.file_name().to_str() {
                    groups.entry(folder.to_string()).or_insert_with(|| default_group(folder));
                }
            }
        }

        Self {
            groups: RwLock::new(groups),
        }
    }

    pub fn insert(&self, group: Group) {
        self.groups.write().expect("group registry lock poisoned").insert(group.folder.clone(), group);
    }
}

#[async_trait]
impl agentflow_scheduler::GroupLookup for GroupRegistryImpl {
    async fn group_by_folder(&self, folder: &str) -> Option<Group> {
        self.groups.read().expect("group registry lock poisoned").get(folder).cloned()
    }
}

impl agentflow_http::state::GroupRegistry for GroupRegistryImpl {
    fn group_folders(&self) -> Vec<String> {
        let mut folders: Vec<String> = self
            .groups
            .read()
            .expect("group registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        folders.sort();
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_groups_dir_still_yields_main() {
        let registry = GroupRegistryImpl::load_from_disk(Path::new("/nonexistent/agentflow/groups"));
        assert_eq!(registry.group_folders(), vec!["main".to_string()]);
    }
}
