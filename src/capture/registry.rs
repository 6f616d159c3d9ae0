//! Registry mapping sink ids to their factories.

use std::{collections::BTreeMap, sync::Arc};

use super::{
    clipboard::ClipboardSinkFactory,
    command::CommandSinkFactory,
    file::{FileSinkConfig, FileSinkFactory},
    sink::{Sink, SinkFactory},
    types::{CaptureError, EncodingMetadata, SinkDescriptor},
};

/// Candidate sink handed to the arranger.
pub type Candidate = Arc<dyn SinkFactory>;

/// Known sink factories, keyed by descriptor id.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    factories: BTreeMap<String, Candidate>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the file and clipboard sinks, plus the upload sink when
    /// a command is configured.
    pub fn builtin(file: FileSinkConfig, upload_command: Option<Vec<String>>) -> Self {
        let mut registry = Self::new();
        registry
            .register(FileSinkFactory::new(file))
            .register(ClipboardSinkFactory::new());
        match upload_command {
            Some(argv) if !argv.is_empty() => {
                registry.register(CommandSinkFactory::new(argv));
            }
            _ => log::debug!("No upload command configured; upload sink disabled"),
        }
        registry
    }

    /// Registers a factory, replacing any previous factory with the same id.
    pub fn register(&mut self, factory: impl SinkFactory + 'static) -> &mut Self {
        let id = factory.descriptor().id.clone();
        if self.factories.insert(id.clone(), Arc::new(factory)).is_some() {
            log::warn!("Replacing previously registered sink '{}'", id);
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<Candidate> {
        self.factories.get(id).cloned()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SinkDescriptor> {
        self.factories.values().map(|factory| factory.descriptor())
    }

    /// Resolves requested ids into candidates, one per id, in request order.
    ///
    /// Unknown ids still produce a candidate; it fails construction so the
    /// request shows up as a failed outcome rather than vanishing.
    pub fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Candidate> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id).unwrap_or_else(|| {
                    log::warn!("Requested sink '{}' is not registered", id);
                    Arc::new(UnknownSinkFactory {
                        descriptor: SinkDescriptor::new(id, id),
                    }) as Candidate
                })
            })
            .collect()
    }
}

struct UnknownSinkFactory {
    descriptor: SinkDescriptor,
}

impl SinkFactory for UnknownSinkFactory {
    fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    fn create(&self, _metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> {
        Err(CaptureError::UnknownSink(self.descriptor.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sink::{FnSinkFactory, MemorySink};

    fn metadata() -> EncodingMetadata {
        EncodingMetadata {
            media_type: "image/png".into(),
            extension: "png".into(),
            width: 1,
            height: 1,
        }
    }

    fn memory_factory(id: &str) -> FnSinkFactory {
        FnSinkFactory::new(SinkDescriptor::new(id, id.to_uppercase()), |_| {
            Ok(Box::new(MemorySink::new()) as Box<dyn Sink>)
        })
    }

    #[test]
    fn resolve_keeps_request_order_and_duplicates() {
        let mut registry = SinkRegistry::new();
        registry.register(memory_factory("a")).register(memory_factory("b"));

        let candidates = registry.resolve(&["b", "a", "b"]);
        let ids: Vec<_> = candidates
            .iter()
            .map(|c| c.descriptor().id.as_str())
            .collect();
        assert_eq!(ids, ["b", "a", "b"]);
    }

    #[test]
    fn unknown_ids_resolve_to_failing_candidates() {
        let registry = SinkRegistry::new();
        let candidates = registry.resolve(&["ftp"]);
        assert_eq!(candidates.len(), 1);
        match candidates[0].create(&metadata()) {
            Err(CaptureError::UnknownSink(id)) => assert_eq!(id, "ftp"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("unknown sink should not construct"),
        }
    }

    #[test]
    fn descriptors_are_listed_by_id() {
        let mut registry = SinkRegistry::new();
        registry.register(memory_factory("zeta")).register(memory_factory("alpha"));
        let names: Vec<_> = registry.descriptors().map(|d| d.name.clone()).collect();
        assert_eq!(names, ["ALPHA", "ZETA"]);
    }

    #[test]
    fn builtin_registers_upload_only_when_configured() {
        let without = SinkRegistry::builtin(FileSinkConfig::default(), None);
        let ids: Vec<_> = without.descriptors().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["clipboard", "file"]);

        let with = SinkRegistry::builtin(
            FileSinkConfig::default(),
            Some(vec!["curl".into(), "-T".into(), "-".into()]),
        );
        assert!(with.get("upload").is_some());
    }
}
