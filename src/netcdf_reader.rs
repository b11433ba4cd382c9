use std::collections::BTreeSet;
use std::path::Path;

use netcdf::AttributeValue;
use serde_json::{Map, Value};

use crate::dataset::{Coordinate, Dataset, DatasetReader, Dimension, Variable};
use crate::error::EtlError;

const NAMED_COORDINATES: [&str; 5] = ["time", "lat", "lon", "latitude", "longitude"];

#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfReader;

impl DatasetReader for NetcdfReader {
    fn open(&self, path: &Path) -> Result<Dataset, EtlError> {
        let file = netcdf::open(path)
            .map_err(|err| EtlError::FileFormat(format!("{}: {err}", path.display())))?;

        let dimensions = file
            .dimensions()
            .map(|dim| Dimension {
                name: dim.name(),
                len: dim.len(),
            })
            .collect::<Vec<_>>();

        let referenced = file
            .variables()
            .filter_map(|var| {
                var.attribute_value("coordinates")
                    .and_then(|value| value.ok())
                    .and_then(|value| match value {
                        AttributeValue::Str(names) => Some(names),
                        _ => None,
                    })
            })
            .flat_map(|names| {
                names
                    .split_whitespace()
                    .map(|name| name.to_string())
                    .collect::<Vec<_>>()
            })
            .collect::<BTreeSet<_>>();

        let mut coordinates = Vec::new();
        let mut variables = Vec::new();
        for var in file.variables() {
            let name = var.name();
            let dims = var
                .dimensions()
                .iter()
                .map(|dim| dim.name())
                .collect::<Vec<_>>();
            let attrs = attributes(var.attributes());
            let is_coordinate = dims.len() == 1
                && (dims[0] == name
                    || referenced.contains(&name)
                    || NAMED_COORDINATES.contains(&name.as_str()));

            if is_coordinate {
                let values = var
                    .get_values::<f64, _>(..)
                    .map_err(|err| EtlError::FileFormat(format!("{name}: {err}")))?;
                coordinates.push(Coordinate {
                    name,
                    dimensions: dims,
                    values,
                    attrs,
                });
            } else {
                let shape = var.dimensions().iter().map(|dim| dim.len()).collect();
                let chunks = var.chunking().ok().flatten();
                variables.push(Variable {
                    name,
                    dimensions: dims,
                    shape,
                    chunks,
                    attrs,
                });
            }
        }

        Ok(Dataset {
            dimensions,
            coordinates,
            variables,
            attrs: attributes(file.attributes()),
        })
    }
}

fn attributes<'a>(attrs: impl Iterator<Item = netcdf::Attribute<'a>>) -> Map<String, Value> {
    attrs
        .filter_map(|attr| {
            let value = attr.value().ok()?;
            Some((attr.name().to_string(), attribute_json(value)))
        })
        .collect()
}

fn attribute_json(value: AttributeValue) -> Value {
    match value {
        AttributeValue::Str(text) => Value::from(text),
        AttributeValue::Strs(texts) => Value::from(texts),
        AttributeValue::Double(number) => Value::from(number),
        AttributeValue::Doubles(numbers) => Value::from(numbers),
        AttributeValue::Float(number) => Value::from(number),
        AttributeValue::Floats(numbers) => Value::from(numbers),
        AttributeValue::Int(number) => Value::from(number),
        AttributeValue::Ints(numbers) => Value::from(numbers),
        AttributeValue::Short(number) => Value::from(number),
        AttributeValue::Shorts(numbers) => Value::from(numbers),
        AttributeValue::Longlong(number) => Value::from(number),
        AttributeValue::Longlongs(numbers) => Value::from(numbers),
        other => Value::from(format!("{other:?}")),
    }
}
