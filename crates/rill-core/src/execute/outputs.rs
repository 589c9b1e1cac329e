//! Output reconciliation.
//!
//! Matches what a task function returned against the outputs the governor
//! declared and turns every result into a data instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::content_type;
use crate::data::{DataInstance, Value};
use crate::error::{Error, Result};
use crate::spec::{DataType, OutputSpec};

use super::context::Context;

/// How a return value maps onto the declared outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// No declared outputs; the return value must be `None` or empty.
    Nothing,
    /// One declared output; the return value is the output itself.
    Scalar,
    /// Several outputs; a list in declaration order, or a map by label.
    Many(usize),
}

impl OutputShape {
    pub fn from_arity(arity: usize) -> Self {
        match arity {
            0 => OutputShape::Nothing,
            1 => OutputShape::Scalar,
            n => OutputShape::Many(n),
        }
    }
}

/// Split a return value into one value per declared output.
pub fn reconcile(value: Value, outputs: &[OutputSpec]) -> Result<Vec<Value>> {
    match OutputShape::from_arity(outputs.len()) {
        OutputShape::Nothing => match value {
            Value::None => Ok(Vec::new()),
            Value::List(items) if items.is_empty() => Ok(Vec::new()),
            other => Err(Error::OutputType(format!(
                "task declares no outputs but returned {}",
                other.type_name()
            ))),
        },
        OutputShape::Scalar => Ok(vec![value]),
        OutputShape::Many(expected) => match value {
            Value::List(items) => {
                if items.len() != expected {
                    return Err(Error::OutputArity {
                        expected,
                        actual: items.len(),
                    });
                }
                Ok(items)
            }
            Value::Map(map) => by_label(map, outputs),
            other => Err(Error::OutputType(format!(
                "task declares {} outputs but returned {}",
                expected,
                other.type_name()
            ))),
        },
    }
}

/// Order a label-keyed map by declared output labels.
fn by_label(mut map: BTreeMap<String, Value>, outputs: &[OutputSpec]) -> Result<Vec<Value>> {
    if map.len() != outputs.len() {
        return Err(Error::OutputArity {
            expected: outputs.len(),
            actual: map.len(),
        });
    }

    outputs
        .iter()
        .map(|spec| {
            map.remove(&spec.label).ok_or_else(|| {
                Error::OutputType(format!("returned map has no output labeled {:?}", spec.label))
            })
        })
        .collect()
}

/// Turn reconciled values into data instances.
///
/// Returned instances pass through after a content type check against the
/// declaration. Everything else is encoded into a fresh in-memory blob.
pub fn normalize(
    values: Vec<Value>,
    outputs: &[OutputSpec],
    ctx: &Context,
) -> Result<Vec<Arc<DataInstance>>> {
    values
        .into_iter()
        .zip(outputs)
        .map(|(value, spec)| match value {
            Value::Data(instance) => {
                check_declared(&instance, spec)?;
                Ok(instance)
            }
            other => {
                if spec.data_type == DataType::Directory {
                    return Err(Error::OutputType(format!(
                        "output {:?} is a directory and needs a staged directory, got {}",
                        spec.label,
                        other.type_name()
                    )));
                }
                ctx.blob(other, spec.encode.as_deref(), spec.content_type.as_deref())
                    .map(Arc::new)
            }
        })
        .collect()
}

fn check_declared(instance: &DataInstance, spec: &OutputSpec) -> Result<()> {
    if instance.data_type() != spec.data_type {
        return Err(Error::OutputType(format!(
            "output {:?} is declared as {:?} but the task returned {:?}",
            spec.label,
            spec.data_type,
            instance.data_type()
        )));
    }
    content_type::merge(instance.content_type(), spec.content_type.as_deref())?;
    Ok(())
}
