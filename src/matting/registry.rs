use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::Device;
use crate::error::{DataError, Result};

use super::backend::MattingBackend;

pub type SharedBackend = Arc<Mutex<dyn MattingBackend>>;

/// Thread-safe registry of matting backends.
///
/// Backends are wrapped in `Mutex` because `MattingBackend::alpha` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: MattingBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(DataError::Matting(format!(
                "backend '{}' not registered",
                name
            )));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that can run on `device`, preferring the default.
    pub fn backend_for_device(&self, device: Device) -> Result<SharedBackend> {
        if let Some(default_backend) = self.default_backend() {
            if supports(&default_backend, device)? {
                return Ok(default_backend);
            }
        }
        for backend in self.backends.values() {
            if supports(backend, device)? {
                return Ok(backend.clone());
            }
        }
        Err(DataError::DeviceUnavailable {
            device: device.to_string(),
            reason: format!(
                "no matting backend among [{}] runs on it",
                self.list().join(", ")
            ),
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn supports(backend: &SharedBackend, device: Device) -> Result<bool> {
    let guard = backend
        .lock()
        .map_err(|_| DataError::Matting("backend lock poisoned".to_string()))?;
    Ok(guard.supports(device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matting::backends::{KeyedBackend, StubBackend};

    #[test]
    fn default_backend_wins_when_it_supports_device() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(KeyedBackend::new([0, 255, 0]));
        registry.set_default("keyed").unwrap();
        let backend = registry.backend_for_device(Device::Cpu).unwrap();
        assert_eq!(backend.lock().unwrap().name(), "keyed");
    }

    #[test]
    fn gpu_request_without_gpu_backend_is_unavailable() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert!(matches!(
            registry.backend_for_device(Device::Cuda(0)),
            Err(DataError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = BackendRegistry::new();
        assert!(registry.set_default("missing").is_err());
    }
}
