//! Provider Registry
//!
//! Durable mapping of provider name to launch descriptor. The registry is
//! pure data plus persistence: it never spawns processes and knows nothing
//! about which provider is currently connected.
//!
//! On disk the registry is a single JSON object keyed by provider name, in
//! insertion order:
//!
//! ```json
//! {
//!   "calc": {
//!     "name": "calc",
//!     "executable_path": "/opt/tools/calc.py",
//!     "runtime_kind": "python",
//!     "environment_overrides": {},
//!     "description": "Arithmetic helpers"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How a provider executable is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// `python <path>`
    Python,
    /// `node <path>`
    Node,
    /// Run the path directly
    Executable,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 3] = [RuntimeKind::Python, RuntimeKind::Node, RuntimeKind::Executable];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Python => "python",
            RuntimeKind::Node => "node",
            RuntimeKind::Executable => "executable",
        }
    }

    /// Program and arguments used to start a provider at `path`
    pub fn command_for(&self, path: &Path) -> (String, Vec<String>) {
        let path = path.to_string_lossy().into_owned();
        match self {
            RuntimeKind::Python => ("python".to_string(), vec![path]),
            RuntimeKind::Node => ("node".to_string(), vec![path]),
            RuntimeKind::Executable => (path, Vec::new()),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(RuntimeKind::Python),
            "node" | "js" | "javascript" => Ok(RuntimeKind::Node),
            "executable" | "exe" | "binary" => Ok(RuntimeKind::Executable),
            other => Err(Error::Validation(format!(
                "Unsupported runtime kind '{}' (expected python, node or executable)",
                other
            ))),
        }
    }
}

/// Everything needed to launch one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub executable_path: PathBuf,
    pub runtime_kind: RuntimeKind,
    /// Merged over the inherited environment at launch
    #[serde(default)]
    pub environment_overrides: HashMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProviderDescriptor {
    pub fn new(
        name: impl Into<String>,
        executable_path: impl Into<PathBuf>,
        runtime_kind: RuntimeKind,
    ) -> Self {
        Self {
            name: name.into(),
            executable_path: executable_path.into(),
            runtime_kind,
            environment_overrides: HashMap::new(),
            description: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Provider name must not be empty".to_string()));
        }
        if !self.executable_path.exists() {
            return Err(Error::Validation(format!(
                "Executable path does not exist: {}",
                self.executable_path.display()
            )));
        }
        Ok(())
    }
}

/// Serializes a descriptor slice as a name-keyed object, keeping order.
struct RegistryDocument<'a>(&'a [ProviderDescriptor]);

impl Serialize for RegistryDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for descriptor in self.0 {
            map.serialize_entry(&descriptor.name, descriptor)?;
        }
        map.end()
    }
}

/// Reads a name-keyed object back into an ordered list.
struct OrderedDescriptors(Vec<ProviderDescriptor>);

impl<'de> Deserialize<'de> for OrderedDescriptors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = OrderedDescriptors;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping provider names to descriptors")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut providers: Vec<ProviderDescriptor> = Vec::new();
                while let Some((key, mut descriptor)) =
                    access.next_entry::<String, ProviderDescriptor>()?
                {
                    // The key is authoritative.
                    descriptor.name = key;
                    match providers.iter_mut().find(|d| d.name == descriptor.name) {
                        Some(existing) => *existing = descriptor,
                        None => providers.push(descriptor),
                    }
                }
                Ok(OrderedDescriptors(providers))
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Registered providers, in insertion order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    path: Option<PathBuf>,
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Registry that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry backed by `path`.
    ///
    /// A missing file gives an empty registry. An unreadable or corrupt file
    /// is logged and also gives an empty registry; it is overwritten on the
    /// next successful mutation.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let providers = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<OrderedDescriptors>(&content) {
                Ok(OrderedDescriptors(providers)) => {
                    info!(path = %path.display(), count = providers.len(), "loaded provider registry");
                    providers
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "provider registry is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no provider registry yet");
                Vec::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read provider registry, starting empty");
                Vec::new()
            }
        };

        Self {
            path: Some(path),
            providers,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a provider and persist.
    ///
    /// Nothing changes in memory or on disk when this fails.
    pub fn add(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        descriptor.validate()?;
        if self.contains(&descriptor.name) {
            return Err(Error::DuplicateName(descriptor.name));
        }

        let name = descriptor.name.clone();
        self.providers.push(descriptor);
        if let Err(e) = self.persist() {
            self.providers.pop();
            return Err(e);
        }

        info!(provider = %name, "registered provider");
        Ok(())
    }

    /// Remove a provider and persist. Returns `false` (and does nothing) when absent.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.providers.iter().position(|d| d.name == name) else {
            return Ok(false);
        };

        let removed = self.providers.remove(index);
        if let Err(e) = self.persist() {
            self.providers.insert(index, removed);
            return Err(e);
        }

        info!(provider = %name, "removed provider");
        Ok(true)
    }

    /// Provider names in insertion order
    pub fn list(&self) -> Vec<String> {
        self.providers.iter().map(|d| d.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.providers
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Write the whole registry via a temp file and rename.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&RegistryDocument(&self.providers))?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %path.display(), count = self.providers.len(), "saved provider registry");
        Ok(())
    }
}
