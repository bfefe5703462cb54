use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::archive::Archive;
use crate::entities::{Direction, Flow, Process, Quantity};
use crate::error::ArchiveError;

/// On-disk archive document.  Exchanges reference flows and terminations by
/// uuid; the loader interns everything into dense ids in two passes so a
/// termination may point at a process declared later in the file.
#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quantities: Vec<RawQuantity>,
    #[serde(default)]
    flows: Vec<RawFlow>,
    #[serde(default)]
    processes: Vec<RawProcess>,
}

#[derive(Debug, Deserialize)]
struct RawQuantity {
    uuid: String,
    name: String,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFlow {
    uuid: String,
    name: String,
    #[serde(default)]
    compartment: Vec<String>,
    #[serde(default)]
    characterizations: Vec<RawCharacterization>,
}

#[derive(Debug, Deserialize)]
struct RawCharacterization {
    quantity: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawProcess {
    uuid: String,
    name: String,
    #[serde(default)]
    exchanges: Vec<RawExchange>,
}

#[derive(Debug, Deserialize)]
struct RawExchange {
    flow: String,
    direction: Direction,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    termination: Option<String>,
    #[serde(default)]
    reference: bool,
}

impl Archive {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Archive, ArchiveError> {
        let text = std::fs::read_to_string(path)?;
        Archive::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Archive, ArchiveError> {
        let doc: RawDocument = serde_json::from_str(text)?;
        let mut archive = Archive::new(doc.title.unwrap_or_default());

        for q in doc.quantities {
            archive.add_quantity(Quantity {
                uuid: q.uuid,
                name: q.name,
                unit: q.unit,
            })?;
        }

        for f in doc.flows {
            let flow_id = archive.add_flow(Flow {
                uuid: f.uuid,
                name: f.name,
                compartment: f.compartment,
                characterizations: HashMap::new(),
            })?;
            for cf in f.characterizations {
                let quantity =
                    archive
                        .quantity_by_uuid(&cf.quantity)
                        .ok_or_else(|| ArchiveError::UnknownUuid {
                            kind: "quantity",
                            uuid: cf.quantity.clone(),
                        })?;
                archive.characterize_flow(flow_id, quantity, cf.value);
            }
        }

        // First pass registers process ids so terminations can resolve forward.
        for p in &doc.processes {
            archive.add_process(Process::new(p.uuid.clone(), p.name.clone()))?;
        }

        for raw in &doc.processes {
            let mut process = Process::new(raw.uuid.clone(), raw.name.clone());
            for x in &raw.exchanges {
                let flow =
                    archive
                        .flow_by_uuid(&x.flow)
                        .ok_or_else(|| ArchiveError::UnknownUuid {
                            kind: "flow",
                            uuid: x.flow.clone(),
                        })?;
                if x.reference {
                    process.add_reference(flow, x.direction, x.value);
                } else {
                    let termination = match &x.termination {
                        Some(uuid) => Some(archive.process_by_uuid(uuid).ok_or_else(|| {
                            ArchiveError::UnknownUuid {
                                kind: "process",
                                uuid: uuid.clone(),
                            }
                        })?),
                        None => None,
                    };
                    process.add_exchange(flow, x.direction, x.value, termination);
                }
            }
            let id = archive
                .process_by_uuid(&raw.uuid)
                .expect("registered in first pass");
            archive.replace_process(id, process);
        }

        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "title": "two linked processes",
        "quantities": [{"uuid": "q-mass", "name": "mass", "unit": "kg"}],
        "flows": [
            {"uuid": "f-steel", "name": "steel", "compartment": [],
             "characterizations": [{"quantity": "q-mass", "value": 1.0}]},
            {"uuid": "f-co2", "name": "carbon dioxide", "compartment": ["air"]}
        ],
        "processes": [
            {"uuid": "p-mill", "name": "steel mill", "exchanges": [
                {"flow": "f-steel", "direction": "output", "value": 1.0, "reference": true},
                {"flow": "f-co2", "direction": "output", "value": 2.0}
            ]}
        ]
    }"#;

    #[test]
    fn loads_a_document() {
        let archive = Archive::from_json_str(DOC).unwrap();
        assert_eq!(archive.title, "two linked processes");
        assert_eq!(archive.process_count(), 1);
        assert_eq!(archive.flow_count(), 2);

        let mill = archive.process(archive.process_by_uuid("p-mill").unwrap());
        assert_eq!(mill.reference_count(), 1);
        assert_eq!(mill.exchanges().len(), 2);

        let steel = archive.flow(archive.flow_by_uuid("f-steel").unwrap());
        let q = archive.quantity_by_uuid("q-mass").unwrap();
        assert_eq!(steel.cf(q), Some(1.0));
    }

    #[test]
    fn unknown_flow_uuid_is_an_error() {
        let doc = r#"{"processes": [{"uuid": "p", "name": "p", "exchanges": [
            {"flow": "missing", "direction": "input", "value": 1.0}
        ]}]}"#;
        let err = Archive::from_json_str(doc).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownUuid { kind: "flow", .. }));
        insta::assert_snapshot!(err, @"unknown flow uuid 'missing'");
    }
}
