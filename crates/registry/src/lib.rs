//! Type-indexed registries for conduit voucher processing.
//!
//! A [`Registry`] maps an opaque [`TypeIdentifier`] to a payload decoder and
//! a processor (validator, revalidator, transport configurer — whatever the
//! instantiation calls for). Registration is insertion-safe: a type
//! identifier can be claimed exactly once. The registry performs no
//! lifecycle management of registered values.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use conduit_primitives::{TypeIdentifier, TypedPayload};

/// Error decoding a wire-level payload into its typed form.
#[derive(Debug, Clone, thiserror::Error)]
#[error("decoding payload failed: {0}")]
pub struct DecodeError(pub String);

/// Turns a wire-level encoded payload back into a typed value.
pub type PayloadDecoder = Arc<dyn Fn(Bytes) -> Result<TypedPayload, DecodeError> + Send + Sync>;

/// Errors returned by [`Registry::register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The type identifier is already claimed.
    #[error("identifier already registered: {0}")]
    AlreadyRegistered(TypeIdentifier),
    /// The type identifier is the empty string.
    #[error("empty type identifier")]
    EmptyIdentifier,
}

struct Entry<P> {
    decoder: PayloadDecoder,
    processor: P,
}

/// An insertion-safe table mapping type identifiers to decoders and
/// processors.
///
/// Reads vastly outnumber writes (registration happens at startup, lookups
/// on every inbound message), hence the RwLock.
pub struct Registry<P> {
    entries: RwLock<HashMap<TypeIdentifier, Entry<P>>>,
}

impl<P> Registry<P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a decoder and processor for `type_id`.
    ///
    /// Fails if `type_id` is empty or already registered.
    pub fn register(
        &self,
        type_id: TypeIdentifier,
        decoder: PayloadDecoder,
        processor: P,
    ) -> Result<(), RegistryError> {
        if type_id.is_empty() {
            return Err(RegistryError::EmptyIdentifier);
        }

        let mut entries = self.entries.write();
        if entries.contains_key(&type_id) {
            return Err(RegistryError::AlreadyRegistered(type_id));
        }
        entries.insert(type_id, Entry { decoder, processor });
        Ok(())
    }

    /// Returns the decoder registered for `type_id`, if any.
    pub fn decoder(&self, type_id: &TypeIdentifier) -> Option<PayloadDecoder> {
        self.entries
            .read()
            .get(type_id)
            .map(|e| Arc::clone(&e.decoder))
    }

    /// Returns true if `type_id` has been registered.
    pub fn contains(&self, type_id: &TypeIdentifier) -> bool {
        self.entries.read().contains_key(type_id)
    }
}

impl<P: Clone> Registry<P> {
    /// Returns the processor registered for `type_id`, if any.
    pub fn processor(&self, type_id: &TypeIdentifier) -> Option<P> {
        self.entries.read().get(type_id).map(|e| e.processor.clone())
    }
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoder that accepts any payload bytes verbatim under `type_id`.
///
/// Suitable for voucher types whose payloads need no structural validation
/// before the processor sees them.
pub fn opaque_decoder(type_id: TypeIdentifier) -> PayloadDecoder {
    Arc::new(move |bytes| Ok(TypedPayload {
        type_id: type_id.clone(),
        payload: bytes,
    }))
}
