//! Typed attribute keys and scoped attribute maps.
//!
//! Attributes configure the logical plan at three scopes: plan, operator,
//! and port. A key is a `static` [`Attr<T>`] carrying a process-unique
//! string token, an optional default, and an optional string codec. Maps
//! preserve insertion order so identical build sequences serialize
//! identically.
//!
//! Scope fallback is the caller's concern: operator lookups fall back to
//! the plan map before the key default, port lookups go straight from the
//! port map to the default.
//!
//! Keys survive serialization by token. Decoding an attribute back into a
//! map requires the key to be registered via [`register_key`]; built-in
//! plan keys register themselves on first use.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use fxhash::FxHashMap;
use parking_lot::RwLock;

#[cfg(test)]
mod tests;

/// Errors raised by the attribute system.
#[derive(Debug, thiserror::Error)]
pub enum AttrError {
    /// An encoded attribute references a token no registered key claims.
    #[error("unknown attribute token: {0}")]
    UnknownToken(String),

    /// The key exists but carries no string codec.
    #[error("attribute {0} has no string codec")]
    NoCodec(&'static str),

    /// The codec rejected the encoded value.
    #[error("failed to decode attribute {token}: {message}")]
    Decode {
        /// Token of the key being decoded.
        token: &'static str,
        /// Codec error message.
        message: String,
    },
}

/// Marker for types storable as attribute values.
///
/// Blanket-implemented for every `'static` type that is `Debug`, thread
/// safe, and cloneable.
pub trait AttrType: Any + fmt::Debug + Send + Sync + Clone {}

impl<T: Any + fmt::Debug + Send + Sync + Clone> AttrType for T {}

/// String codec for an attribute value.
///
/// Both halves are plain function pointers so codecs can live in `const`
/// key definitions.
#[derive(Clone, Copy)]
pub struct AttrCodec<T> {
    /// Encodes a value into its stable string form.
    pub encode: fn(&T) -> String,
    /// Decodes the stable string form; the error is a human-readable message.
    pub decode: fn(&str) -> Result<T, String>,
}

fn encode_display<T: fmt::Display>(value: &T) -> String {
    value.to_string()
}

fn decode_from_str<T: FromStr>(encoded: &str) -> Result<T, String>
where
    T::Err: fmt::Display,
{
    encoded.parse::<T>().map_err(|e| e.to_string())
}

/// Codec for types with matching `Display`/`FromStr` representations.
#[must_use]
pub const fn display_codec<T: fmt::Display + FromStr>() -> AttrCodec<T>
where
    T::Err: fmt::Display,
{
    AttrCodec {
        encode: encode_display::<T>,
        decode: decode_from_str::<T>,
    }
}

/// A typed attribute key.
///
/// Keys are compared by token, which doubles as the serialized identity.
/// Define keys as `static` items so maps can hold `&'static` references:
///
/// ```rust
/// use spate_core::attr::{display_codec, Attr};
///
/// static QUEUE_CAPACITY: Attr<u32> = Attr::with_codec("port.queue_capacity", Some(1024), display_codec());
/// assert_eq!(QUEUE_CAPACITY.default_value(), Some(1024));
/// ```
pub struct Attr<T: 'static> {
    token: &'static str,
    default: Option<T>,
    codec: Option<AttrCodec<T>>,
}

impl<T: AttrType> Attr<T> {
    /// Creates a key without a string codec.
    ///
    /// Values stored under codec-less keys do not survive serialization.
    #[must_use]
    pub const fn new(token: &'static str, default: Option<T>) -> Self {
        Self {
            token,
            default,
            codec: None,
        }
    }

    /// Creates a key with a string codec.
    #[must_use]
    pub const fn with_codec(token: &'static str, default: Option<T>, codec: AttrCodec<T>) -> Self {
        Self {
            token,
            default,
            codec: Some(codec),
        }
    }

    /// The process-unique identity token.
    #[must_use]
    pub fn token(&self) -> &'static str {
        self.token
    }

    /// A copy of the key's default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<T> {
        self.default.clone()
    }
}

impl<T> fmt::Debug for Attr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attr").field("token", &self.token).finish()
    }
}

impl<T> PartialEq for Attr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl<T> Eq for Attr<T> {}

/// Boxed attribute value with cloning and downcasting support.
trait AttrValue: Any + fmt::Debug + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn AttrValue>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: AttrType> AttrValue for T {
    fn clone_boxed(&self) -> Box<dyn AttrValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased view of an [`Attr<T>`], used by map entries and the registry.
pub(crate) trait AnyAttr: Send + Sync {
    fn token(&self) -> &'static str;
    /// Encodes a stored value through the key's codec, if it has one.
    fn encode(&self, value: &dyn Any) -> Option<String>;
    /// Decodes an encoded value and stores it in `map` under this key.
    fn decode_into(&'static self, map: &mut AttributeMap, encoded: &str) -> Result<(), AttrError>;
}

impl<T: AttrType> AnyAttr for Attr<T> {
    fn token(&self) -> &'static str {
        self.token
    }

    fn encode(&self, value: &dyn Any) -> Option<String> {
        let codec = self.codec.as_ref()?;
        let value = value.downcast_ref::<T>()?;
        Some((codec.encode)(value))
    }

    fn decode_into(&'static self, map: &mut AttributeMap, encoded: &str) -> Result<(), AttrError> {
        let codec = self.codec.as_ref().ok_or(AttrError::NoCodec(self.token))?;
        let value = (codec.decode)(encoded).map_err(|message| AttrError::Decode {
            token: self.token,
            message,
        })?;
        map.put(self, value);
        Ok(())
    }
}

struct AttrEntry {
    key: &'static dyn AnyAttr,
    value: Box<dyn AttrValue>,
}

/// An insertion-ordered attribute map for one scope.
///
/// `put` on an existing key replaces the value in place, keeping the
/// original position. Maps are small; lookup is a linear scan.
#[derive(Default)]
pub struct AttributeMap {
    entries: Vec<AttrEntry>,
}

impl AttributeMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value for `key`, without default fallback.
    #[must_use]
    pub fn get<T: AttrType>(&self, key: &Attr<T>) -> Option<T> {
        self.entries
            .iter()
            .find(|e| e.key.token() == key.token)
            .and_then(|e| e.value.as_any().downcast_ref::<T>())
            .cloned()
    }

    /// Returns the stored value for `key`, falling back to the key default.
    #[must_use]
    pub fn value<T: AttrType>(&self, key: &Attr<T>) -> Option<T> {
        self.get(key).or_else(|| key.default_value())
    }

    /// Stores `value` under `key`.
    pub fn put<T: AttrType>(&mut self, key: &'static Attr<T>, value: T) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.key.token() == key.token)
        {
            entry.value = Box::new(value);
        } else {
            self.entries.push(AttrEntry {
                key,
                value: Box::new(value),
            });
        }
    }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains<T: AttrType>(&self, key: &Attr<T>) -> bool {
        self.entries.iter().any(|e| e.key.token() == key.token)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes all codec-bearing entries as `(token, value)` pairs in
    /// insertion order. Entries without a codec are dropped.
    #[must_use]
    pub fn encoded_entries(&self) -> Vec<(String, String)> {
        let mut encoded = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry.key.encode(entry.value.as_any()) {
                Some(value) => encoded.push((entry.key.token().to_string(), value)),
                None => {
                    tracing::debug!(
                        token = entry.key.token(),
                        "attribute has no string codec, dropped from serialization"
                    );
                }
            }
        }
        encoded
    }

    /// Decodes `encoded` through the registered key for `token` and stores
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns [`AttrError::UnknownToken`] if no key is registered for
    /// `token`, [`AttrError::NoCodec`] or [`AttrError::Decode`] if the key
    /// cannot decode the value.
    pub fn decode_and_put(&mut self, token: &str, encoded: &str) -> Result<(), AttrError> {
        let key = lookup(token).ok_or_else(|| AttrError::UnknownToken(token.to_string()))?;
        key.decode_into(self, encoded)
    }
}

impl Clone for AttributeMap {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| AttrEntry {
                    key: e.key,
                    value: e.value.clone_boxed(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.entries {
            map.entry(&entry.key.token(), &entry.value);
        }
        map.finish()
    }
}

type Registry = FxHashMap<&'static str, &'static dyn AnyAttr>;

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Registers a key so encoded attributes can rebind to it on load.
pub fn register_key<T: AttrType>(key: &'static Attr<T>) {
    registry().write().insert(key.token, key);
}

pub(crate) fn lookup(token: &str) -> Option<&'static dyn AnyAttr> {
    registry().read().get(token).copied()
}
