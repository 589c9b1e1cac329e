//! Argument reconstruction.
//!
//! A task's positional and keyword arguments arrive as serialized
//! [`ArgValue`] streams in its config. Data objects passed as arguments were
//! turned into extra task inputs on the client side and replaced by
//! [`Placeholder`]s carrying the input index. Reconstruction decodes the
//! streams and swaps every placeholder for the matching input while
//! deserializing, using a substitution table threaded through a
//! [`DeserializeSeed`].
//!
//! The table only lives for the duration of [`reconstruct`]; nothing leaks
//! from one call into the next.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::{
    self, DeserializeSeed, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor,
};

use crate::data::{ArgValue, DataInstance, Placeholder, Value};
use crate::error::{Error, Result};
use crate::spec::TaskConfig;

/// Reconstructed arguments of a task function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional arguments.
    pub positional: Vec<Value>,
    /// Keyword arguments.
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// Positional argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Keyword argument `name`.
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// Decode the arguments in `config`, resolving placeholders against
/// `inputs` (the task inputs without the closure blob).
pub fn reconstruct(config: &TaskConfig, inputs: &[Arc<DataInstance>]) -> Result<Args> {
    let table = Substitutions {
        inputs,
        auto_load: config.auto_load,
        failure: RefCell::new(None),
    };

    let positional = table.decode(&config.args, ListSeed { table: &table })?;
    let keyword = table.decode(&config.kwargs, MapSeed { table: &table })?;

    Ok(Args {
        positional,
        keyword,
    })
}

/// Per-call substitution table.
struct Substitutions<'a> {
    /// Data inputs, indexed by placeholder index.
    inputs: &'a [Arc<DataInstance>],
    /// Load flag for placeholders without one.
    auto_load: bool,
    /// First resolution error, kept so it is not flattened into a string.
    failure: RefCell<Option<Error>>,
}

impl Substitutions<'_> {
    fn resolve(&self, placeholder: Placeholder) -> Result<Value> {
        let instance = self.inputs.get(placeholder.index).ok_or_else(|| {
            Error::Placeholder(format!(
                "placeholder refers to input {} but the task has {} data inputs",
                placeholder.index,
                self.inputs.len()
            ))
        })?;

        if placeholder.load.unwrap_or(self.auto_load) {
            instance.load_as(placeholder.content_type.as_deref())
        } else {
            Ok(Value::Data(instance.clone()))
        }
    }

    fn fail<E: de::Error>(&self, error: Error) -> E {
        let message = error.to_string();
        self.failure.borrow_mut().get_or_insert(error);
        E::custom(message)
    }

    /// Run `seed` over one argument stream. An empty stream decodes to the
    /// seed's empty value.
    fn decode<'de, S>(&self, bytes: &'de [u8], seed: S) -> Result<S::Value>
    where
        S: DeserializeSeed<'de>,
        S::Value: Default,
    {
        if bytes.is_empty() {
            return Ok(S::Value::default());
        }

        let (value, read) =
            bincode::serde::seed_decode_from_slice(seed, bytes, bincode::config::standard())
                .map_err(|e| {
                    self.failure.borrow_mut().take().unwrap_or_else(|| {
                        Error::Deserialization(format!("invalid argument stream: {}", e))
                    })
                })?;

        if read != bytes.len() {
            return Err(Error::Deserialization(format!(
                "argument stream has {} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(value)
    }
}

/// Variant names of [`ArgValue`], in wire order.
const VARIANTS: &[&str] = &[
    "None",
    "Bool",
    "Int",
    "Float",
    "Str",
    "Bytes",
    "List",
    "Map",
    "Placeholder",
];

/// Variant identifier of [`ArgValue`].
#[derive(Deserialize)]
#[serde(variant_identifier)]
enum Tag {
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Map,
    Placeholder,
}

/// Deserializes one [`ArgValue`] straight into a resolved [`Value`].
#[derive(Clone, Copy)]
struct ValueSeed<'t, 'a> {
    table: &'t Substitutions<'a>,
}

impl<'de> DeserializeSeed<'de> for ValueSeed<'_, '_> {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_enum("ArgValue", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed<'_, '_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an argument value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> std::result::Result<Value, A::Error> {
        let (tag, variant) = data.variant::<Tag>()?;
        match tag {
            Tag::None => variant.unit_variant().map(|()| Value::None),
            Tag::Bool => variant.newtype_variant().map(Value::Bool),
            Tag::Int => variant.newtype_variant().map(Value::Int),
            Tag::Float => variant.newtype_variant().map(Value::Float),
            Tag::Str => variant.newtype_variant().map(Value::Str),
            Tag::Bytes => variant.newtype_variant().map(Value::Bytes),
            Tag::List => variant
                .newtype_variant_seed(ListSeed { table: self.table })
                .map(Value::List),
            Tag::Map => variant
                .newtype_variant_seed(MapSeed { table: self.table })
                .map(Value::Map),
            Tag::Placeholder => {
                let placeholder: Placeholder = variant.newtype_variant()?;
                self.table
                    .resolve(placeholder)
                    .map_err(|e| self.table.fail(e))
            }
        }
    }
}

/// Deserializes a sequence of [`ArgValue`]s.
struct ListSeed<'t, 'a> {
    table: &'t Substitutions<'a>,
}

impl<'de> DeserializeSeed<'de> for ListSeed<'_, '_> {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Vec<Value>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed<'_, '_> {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of argument values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Vec<Value>, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element_seed(ValueSeed { table: self.table })? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Deserializes a string-keyed map of [`ArgValue`]s.
struct MapSeed<'t, 'a> {
    table: &'t Substitutions<'a>,
}

impl<'de> DeserializeSeed<'de> for MapSeed<'_, '_> {
    type Value = BTreeMap<String, Value>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MapSeed<'_, '_> {
    type Value = BTreeMap<String, Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of keyword arguments")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut out = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(ValueSeed { table: self.table })?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

/// Encode positional arguments for a task config.
pub fn encode_positional(args: &[ArgValue]) -> Result<Vec<u8>> {
    crate::data::encode_args(args)
}

/// Encode keyword arguments for a task config.
pub fn encode_keywords(kwargs: &BTreeMap<String, ArgValue>) -> Result<Vec<u8>> {
    crate::data::encode_args(kwargs)
}
