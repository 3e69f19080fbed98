//! The loaded contract interface: an ordered table of event descriptors
//! keyed by signature hash.

use crate::error::SchemaError;
use crate::event::EventFingerprint;
use crate::types::CanonicalType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One declared event argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSlot {
    pub name: String,
    pub ty: CanonicalType,
    /// Indexed arguments travel in topics[1..], the rest in the data payload.
    pub indexed: bool,
}

/// A single event the contract can emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    /// Canonical signature, e.g. `CargoCreated(uint256,address,address,string)`
    pub signature: String,
    pub fingerprint: EventFingerprint,
    /// Arguments in declaration order.
    pub params: Vec<ParamSlot>,
}

impl EventDescriptor {
    pub fn indexed_params(&self) -> impl Iterator<Item = &ParamSlot> {
        self.params.iter().filter(|p| p.indexed)
    }

    pub fn data_params(&self) -> impl Iterator<Item = &ParamSlot> {
        self.params.iter().filter(|p| !p.indexed)
    }

    /// topics[0] plus one topic per indexed argument.
    pub fn expected_topics(&self) -> usize {
        1 + self.indexed_params().count()
    }
}

/// Immutable, exact-match lookup table from signature hash to descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractInterface {
    events: IndexMap<EventFingerprint, EventDescriptor>,
}

impl ContractInterface {
    /// Build an interface from descriptors. An empty set is a schema error.
    pub fn new(descriptors: impl IntoIterator<Item = EventDescriptor>) -> Result<Self, SchemaError> {
        let events: IndexMap<_, _> = descriptors
            .into_iter()
            .map(|d| (d.fingerprint.clone(), d))
            .collect();
        if events.is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(Self { events })
    }

    pub fn get(&self, fingerprint: &EventFingerprint) -> Option<&EventDescriptor> {
        self.events.get(fingerprint)
    }

    pub fn by_name(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.values().find(|d| d.name == name)
    }

    /// Descriptors in document order.
    pub fn events(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, fp_byte: u8) -> EventDescriptor {
        EventDescriptor {
            name: name.into(),
            signature: format!("{name}(uint256)"),
            fingerprint: EventFingerprint::from_bytes([fp_byte; 32]),
            params: vec![ParamSlot {
                name: "cargoId".into(),
                ty: CanonicalType::Uint(256),
                indexed: true,
            }],
        }
    }

    #[test]
    fn empty_interface_is_rejected() {
        let err = ContractInterface::new(Vec::new()).unwrap_err();
        assert!(matches!(err, SchemaError::Empty));
    }

    #[test]
    fn lookup_is_exact() {
        let iface =
            ContractInterface::new(vec![descriptor("A", 0xaa), descriptor("B", 0xbb)]).unwrap();
        assert_eq!(iface.len(), 2);
        assert_eq!(
            iface.get(&EventFingerprint::from_bytes([0xaa; 32])).unwrap().name,
            "A"
        );
        let mut near = [0xaa; 32];
        near[31] = 0xab;
        assert!(iface.get(&EventFingerprint::from_bytes(near)).is_none());
        assert_eq!(iface.by_name("B").unwrap().expected_topics(), 2);
    }

    #[test]
    fn events_keep_document_order() {
        let iface =
            ContractInterface::new(vec![descriptor("Z", 0x01), descriptor("A", 0x02)]).unwrap();
        let names: Vec<_> = iface.events().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Z", "A"]);
    }
}
