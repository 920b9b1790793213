//! Plugin-defined payloads stored alongside the cached version.
//!
//! A plugin that wants to keep its own data in the cache record registers a
//! codec under a unique name while the cache manager is being created. The
//! codecs are combined into one [`CompositeCodec`] used for both directions.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{CacheError, CacheResult};
use crate::sync::lock;

type AnyPayload = Arc<dyn Any + Send + Sync>;

/// Encodes and decodes one named extension payload.
pub trait ExtensionCodec: Send + Sync {
    /// Key of the payload in the record's `extensions` map.
    fn name(&self) -> &str;

    /// Turn the payload into JSON. Fails if `value` is not the codec's type.
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, String>;

    /// Turn stored JSON back into the payload.
    fn decode(&self, raw: Value) -> Result<AnyPayload, String>;
}

/// Codec for any serde type.
pub struct JsonExtension<T> {
    name: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonExtension<T> {
    /// A codec for payloads of type `T` stored under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonExtension<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonExtension")
            .field("name", &self.name)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> ExtensionCodec for JsonExtension<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, String> {
        let typed = value.downcast_ref::<T>().ok_or_else(|| {
            format!(
                "extension `{}` holds a value that is not a {}",
                self.name,
                std::any::type_name::<T>()
            )
        })?;
        serde_json::to_value(typed).map_err(|e| e.to_string())
    }

    fn decode(&self, raw: Value) -> Result<AnyPayload, String> {
        let typed: T = serde_json::from_value(raw).map_err(|e| e.to_string())?;
        Ok(Arc::new(typed))
    }
}

/// Typed extension payloads keyed by extension name.
#[derive(Clone, Default)]
pub struct ExtensionPayloads {
    values: BTreeMap<String, AnyPayload>,
}

impl ExtensionPayloads {
    /// No payloads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, replacing any previous payload.
    pub fn insert<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    /// The payload stored under `name`, if it is a `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        let value: &(dyn Any + Send + Sync) = &**self.values.get(name)?;
        value.downcast_ref::<T>()
    }

    /// Whether a payload is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no payload is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Payload names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for ExtensionPayloads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// All registered codecs, applied by extension name.
#[derive(Clone, Default)]
pub struct CompositeCodec {
    codecs: Vec<Arc<dyn ExtensionCodec>>,
}

impl CompositeCodec {
    /// Combine `codecs`; names are expected to be unique.
    pub fn new(codecs: Vec<Arc<dyn ExtensionCodec>>) -> Self {
        Self { codecs }
    }

    /// Names of the combined codecs, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.iter().map(|codec| codec.name())
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn ExtensionCodec>> {
        self.codecs.iter().find(|codec| codec.name() == name)
    }

    /// Encode every payload. A payload without a codec is an error, since it
    /// would otherwise be silently dropped from the record.
    pub fn encode(&self, payloads: &ExtensionPayloads) -> CacheResult<BTreeMap<String, Value>> {
        let mut encoded = BTreeMap::new();
        for (name, value) in &payloads.values {
            let codec = self.find(name).ok_or_else(|| CacheError::UnknownExtension {
                name: name.clone(),
            })?;
            let raw = codec
                .encode(&**value)
                .map_err(|reason| CacheError::Serialization { reason })?;
            encoded.insert(name.clone(), raw);
        }
        Ok(encoded)
    }

    /// Decode stored payloads. Entries nobody registered a codec for are
    /// skipped; a codec that rejects its entry fails the whole decode.
    pub fn decode(&self, raw: BTreeMap<String, Value>) -> Result<ExtensionPayloads, String> {
        let mut payloads = ExtensionPayloads::new();
        for (name, value) in raw {
            match self.find(&name) {
                Some(codec) => {
                    let decoded = codec
                        .decode(value)
                        .map_err(|reason| format!("extension `{name}`: {reason}"))?;
                    payloads.values.insert(name, decoded);
                }
                None => debug!(extension = %name, "skipping extension without codec"),
            }
        }
        Ok(payloads)
    }
}

impl fmt::Debug for CompositeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Collects extension codecs while the cache manager is being created.
#[derive(Default)]
pub struct VersionCacheManagerContext {
    codecs: Mutex<Vec<Arc<dyn ExtensionCodec>>>,
}

impl VersionCacheManagerContext {
    /// A context without codecs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a codec. Extension names must be unique.
    pub fn register_extension<C: ExtensionCodec + 'static>(&self, codec: C) -> CacheResult<()> {
        let mut codecs = lock(&self.codecs);
        if codecs.iter().any(|existing| existing.name() == codec.name()) {
            return Err(CacheError::DuplicateExtension {
                name: codec.name().to_string(),
            });
        }
        debug!(extension = codec.name(), "registered cache extension");
        codecs.push(Arc::new(codec));
        Ok(())
    }

    /// Snapshot of the registered codecs.
    pub fn codec(&self) -> CompositeCodec {
        CompositeCodec::new(lock(&self.codecs).clone())
    }
}

impl fmt::Debug for VersionCacheManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionCacheManagerContext")
            .field("codecs", &self.codec())
            .finish()
    }
}
