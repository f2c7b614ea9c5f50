use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{ByteReader, DecodeError};
use crate::chain::Name;

fn default_string() -> String {
    String::new()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default = "default_string")]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

// Action and table names are kept as plain strings: contract ABIs use packed
// chain names but the state-history protocol ABI declares tables like
// "contract_row" that no packed name can represent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_string")]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default = "default_string")]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

/// The raw ABI document as found on chain or received from the
/// state-history socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbiDef {
    #[serde(default = "default_string")]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
}

impl AbiDef {
    /// Parse the binary `abi_def` layout carried by `setabi` action payloads.
    ///
    /// Trailing sections past `variants` (action results and later protocol
    /// extensions) are ignored.
    pub fn from_bin(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(data);
        let version = reader.read_string()?;

        let mut types = Vec::new();
        for _ in 0..reader.read_varuint32()? {
            types.push(TypeDef {
                new_type_name: reader.read_string()?,
                type_name: reader.read_string()?,
            });
        }

        let mut structs = Vec::new();
        for _ in 0..reader.read_varuint32()? {
            let name = reader.read_string()?;
            let base = reader.read_string()?;
            let mut fields = Vec::new();
            for _ in 0..reader.read_varuint32()? {
                fields.push(FieldDef {
                    name: reader.read_string()?,
                    type_name: reader.read_string()?,
                });
            }
            structs.push(StructDef { name, base, fields });
        }

        let mut actions = Vec::new();
        for _ in 0..reader.read_varuint32()? {
            actions.push(ActionDef {
                name: Name::from_raw(reader.read_u64()?).to_string(),
                type_name: reader.read_string()?,
                ricardian_contract: reader.read_string()?,
            });
        }

        let mut tables = Vec::new();
        for _ in 0..reader.read_varuint32()? {
            let name = Name::from_raw(reader.read_u64()?).to_string();
            let index_type = reader.read_string()?;
            let mut key_names = Vec::new();
            for _ in 0..reader.read_varuint32()? {
                key_names.push(reader.read_string()?);
            }
            let mut key_types = Vec::new();
            for _ in 0..reader.read_varuint32()? {
                key_types.push(reader.read_string()?);
            }
            let type_name = reader.read_string()?;
            tables.push(TableDef {
                name,
                index_type,
                key_names,
                key_types,
                type_name,
            });
        }

        // ricardian_clauses
        for _ in 0..reader.read_varuint32()? {
            reader.read_string()?;
            reader.read_string()?;
        }

        // error_messages
        for _ in 0..reader.read_varuint32()? {
            reader.read_u64()?;
            reader.read_string()?;
        }

        // abi_extensions
        for _ in 0..reader.read_varuint32()? {
            reader.read_u16()?;
            reader.read_sized_bytes()?;
        }

        // variants are themselves a binary extension, absent in old ABIs
        let mut variants = Vec::new();
        if reader.remaining() > 0 {
            for _ in 0..reader.read_varuint32()? {
                let name = reader.read_string()?;
                let mut variant_types = Vec::new();
                for _ in 0..reader.read_varuint32()? {
                    variant_types.push(reader.read_string()?);
                }
                variants.push(VariantDef {
                    name,
                    types: variant_types,
                });
            }
        }

        Ok(Self {
            version,
            types,
            structs,
            actions,
            tables,
            variants,
        })
    }
}

/// An ABI indexed for decoding: constant-time struct/variant/typedef lookup
/// plus the action and table type maps.
#[derive(Debug, Clone, Default)]
pub struct Abi {
    pub def: AbiDef,
    typedefs: HashMap<String, String>,
    structs: HashMap<String, usize>,
    variants: HashMap<String, usize>,
    actions: HashMap<String, String>,
    tables: HashMap<String, String>,
}

impl Abi {
    pub fn new(def: AbiDef) -> Self {
        let typedefs = def
            .types
            .iter()
            .map(|t| (t.new_type_name.clone(), t.type_name.clone()))
            .collect();
        let structs = def
            .structs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let variants = def
            .variants
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), i))
            .collect();
        let actions = def
            .actions
            .iter()
            .map(|a| (a.name.clone(), a.type_name.clone()))
            .collect();
        let tables = def
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.type_name.clone()))
            .collect();

        Self {
            def,
            typedefs,
            structs,
            variants,
            actions,
            tables,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let def: AbiDef =
            serde_json::from_str(json).map_err(|e| DecodeError::InvalidAbi(e.to_string()))?;
        Ok(Self::new(def))
    }

    pub fn from_bin(data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self::new(AbiDef::from_bin(data)?))
    }

    /// Follow typedef aliases down to a concrete type name.
    pub fn resolve_type<'a>(&'a self, type_name: &'a str) -> Result<&'a str, DecodeError> {
        let mut current = type_name;
        // a typedef chain longer than the typedef table must be cyclic
        for _ in 0..=self.typedefs.len() {
            match self.typedefs.get(current) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(DecodeError::TypedefCycle(type_name.to_string()))
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name).map(|&i| &self.def.structs[i])
    }

    pub fn get_variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.get(name).map(|&i| &self.def.variants[i])
    }

    /// Payload type of an action, if the ABI declares it.
    pub fn action_type(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    /// Row type of a table, if the ABI declares it.
    pub fn table_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }
}
