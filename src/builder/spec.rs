use crate::error::{GalvaniError, Result};
use crate::nn::Padding;

/// Raw, untyped layer description as supplied by a caller.
///
/// Network architectures arrive as nested lists of tags and numbers, e.g.
/// `[["conv", 8, 3, 1, "same"], ["linear", 10]]`. Nothing about them is
/// trusted; [`parse_layers`] turns them into typed [`LayerSpec`]s or a
/// precise configuration error.
#[derive(Clone, Debug, PartialEq)]
pub enum SpecValue {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SpecValue>),
}

impl From<i64> for SpecValue {
    fn from(v: i64) -> Self {
        SpecValue::Int(v)
    }
}

impl From<i32> for SpecValue {
    fn from(v: i32) -> Self {
        SpecValue::Int(v as i64)
    }
}

impl From<usize> for SpecValue {
    fn from(v: usize) -> Self {
        SpecValue::Int(v as i64)
    }
}

impl From<f64> for SpecValue {
    fn from(v: f64) -> Self {
        SpecValue::Float(v)
    }
}

impl From<f32> for SpecValue {
    fn from(v: f32) -> Self {
        SpecValue::Float(v as f64)
    }
}

impl From<&str> for SpecValue {
    fn from(v: &str) -> Self {
        SpecValue::Str(v.to_string())
    }
}

impl From<String> for SpecValue {
    fn from(v: String) -> Self {
        SpecValue::Str(v)
    }
}

impl From<Vec<SpecValue>> for SpecValue {
    fn from(v: Vec<SpecValue>) -> Self {
        SpecValue::List(v)
    }
}

impl SpecValue {
    fn kind(&self) -> &'static str {
        match self {
            SpecValue::Int(_) => "integer",
            SpecValue::Float(_) => "float",
            SpecValue::Str(_) => "string",
            SpecValue::List(_) => "list",
        }
    }
}

/// Build a `SpecValue::List` from heterogeneous items; nest calls for
/// sub-lists:
///
/// ```
/// use galvani::spec_list;
/// let layers = spec_list![
///     spec_list!["conv", 8, 3, 1, "same"],
///     spec_list!["linear", 10],
/// ];
/// ```
#[macro_export]
macro_rules! spec_list {
    ($($item:expr),* $(,)?) => {
        $crate::builder::spec::SpecValue::List(
            vec![$($crate::builder::spec::SpecValue::from($item)),*]
        )
    };
}

/// A validated layer description.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerSpec {
    Conv {
        filters: usize,
        kernel: usize,
        stride: usize,
        padding: Padding,
    },
    MaxPool {
        kernel: usize,
        stride: usize,
        padding: Padding,
    },
    AvgPool {
        kernel: usize,
        stride: usize,
        padding: Padding,
    },
    AdaptiveMaxPool {
        out_h: usize,
        out_w: usize,
    },
    AdaptiveAvgPool {
        out_h: usize,
        out_w: usize,
    },
    Linear {
        out_features: usize,
    },
}

impl LayerSpec {
    pub fn tag(&self) -> &'static str {
        match self {
            LayerSpec::Conv { .. } => "conv",
            LayerSpec::MaxPool { .. } => "maxpool",
            LayerSpec::AvgPool { .. } => "avgpool",
            LayerSpec::AdaptiveMaxPool { .. } => "adaptivemaxpool",
            LayerSpec::AdaptiveAvgPool { .. } => "adaptiveavgpool",
            LayerSpec::Linear { .. } => "linear",
        }
    }
}

/// Validated network architecture: hidden layers followed by one or more
/// linear output heads (their `out_features`).
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkSpec {
    pub hidden: Vec<LayerSpec>,
    pub heads: Vec<usize>,
}

fn positive_int(index: usize, field: &'static str, value: &SpecValue) -> Result<usize> {
    match value {
        SpecValue::Int(i) if *i > 0 => Ok(*i as usize),
        SpecValue::Int(i) => Err(GalvaniError::InvalidField {
            index,
            field,
            reason: format!("must be a positive integer, got {i}"),
        }),
        other => Err(GalvaniError::InvalidField {
            index,
            field,
            reason: format!("must be a positive integer, got a {}", other.kind()),
        }),
    }
}

fn padding_value(index: usize, value: &SpecValue) -> Result<Padding> {
    let SpecValue::Str(s) = value else {
        return Err(GalvaniError::InvalidField {
            index,
            field: "padding",
            reason: format!("must be \"same\" or \"valid\", got a {}", value.kind()),
        });
    };
    match s.to_lowercase().as_str() {
        "same" => Ok(Padding::Same),
        "valid" => Ok(Padding::Valid),
        other => Err(GalvaniError::InvalidField {
            index,
            field: "padding",
            reason: format!("must be \"same\" or \"valid\", got {other:?}"),
        }),
    }
}

fn expect_fields(
    index: usize,
    tag: &'static str,
    items: &[SpecValue],
    expected: usize,
) -> Result<()> {
    if items.len() != expected {
        return Err(GalvaniError::FieldCount {
            index,
            tag,
            expected,
            got: items.len(),
        });
    }
    Ok(())
}

/// Parse a single `[tag, fields...]` element.
fn parse_one(index: usize, items: &[SpecValue]) -> Result<LayerSpec> {
    let Some(first) = items.first() else {
        return Err(GalvaniError::InvalidSpec {
            index,
            reason: "layer spec must not be empty".to_string(),
        });
    };
    let SpecValue::Str(tag) = first else {
        return Err(GalvaniError::InvalidSpec {
            index,
            reason: format!("layer spec must start with a tag string, got a {}", first.kind()),
        });
    };

    match tag.to_lowercase().as_str() {
        "conv" => {
            expect_fields(index, "conv", items, 5)?;
            Ok(LayerSpec::Conv {
                filters: positive_int(index, "filters", &items[1])?,
                kernel: positive_int(index, "kernel", &items[2])?,
                stride: positive_int(index, "stride", &items[3])?,
                padding: padding_value(index, &items[4])?,
            })
        }
        "maxpool" => {
            expect_fields(index, "maxpool", items, 4)?;
            Ok(LayerSpec::MaxPool {
                kernel: positive_int(index, "kernel", &items[1])?,
                stride: positive_int(index, "stride", &items[2])?,
                padding: padding_value(index, &items[3])?,
            })
        }
        "avgpool" => {
            expect_fields(index, "avgpool", items, 4)?;
            Ok(LayerSpec::AvgPool {
                kernel: positive_int(index, "kernel", &items[1])?,
                stride: positive_int(index, "stride", &items[2])?,
                padding: padding_value(index, &items[3])?,
            })
        }
        "adaptivemaxpool" => {
            expect_fields(index, "adaptivemaxpool", items, 3)?;
            Ok(LayerSpec::AdaptiveMaxPool {
                out_h: positive_int(index, "out_h", &items[1])?,
                out_w: positive_int(index, "out_w", &items[2])?,
            })
        }
        "adaptiveavgpool" => {
            expect_fields(index, "adaptiveavgpool", items, 3)?;
            Ok(LayerSpec::AdaptiveAvgPool {
                out_h: positive_int(index, "out_h", &items[1])?,
                out_w: positive_int(index, "out_w", &items[2])?,
            })
        }
        other => Err(GalvaniError::UnknownTag {
            index,
            tag: other.to_string(),
        }),
    }
}

/// Parse an element that must be a linear layer (trailing position or an
/// output head).
fn parse_linear(index: usize, items: &[SpecValue]) -> Result<usize> {
    let Some(SpecValue::Str(tag)) = items.first() else {
        return Err(GalvaniError::InvalidSpec {
            index,
            reason: "layer spec must start with a tag string".to_string(),
        });
    };
    if tag.to_lowercase() != "linear" {
        return Err(GalvaniError::InvalidSpec {
            index,
            reason: format!("expected a linear layer here, got {tag:?}"),
        });
    }
    expect_fields(index, "linear", items, 2)?;
    positive_int(index, "out_features", &items[1])
}

fn is_linear_tagged(items: &[SpecValue]) -> bool {
    matches!(items.first(), Some(SpecValue::Str(t)) if t.to_lowercase() == "linear")
}

/// Validate a raw architecture description.
///
/// The element sequence is conv/pool layers, then zero or more linear
/// layers, ending with either a final linear (single output head) or a list
/// of linear specs (multiple heads). The returned [`NetworkSpec`] keeps the
/// trailing linears before the last element as hidden layers.
pub fn parse_layers(layers_info: &SpecValue) -> Result<NetworkSpec> {
    let SpecValue::List(elements) = layers_info else {
        return Err(GalvaniError::InvalidSpec {
            index: 0,
            reason: format!(
                "layers must be a list of layer specs, got a {}",
                layers_info.kind()
            ),
        });
    };
    if elements.is_empty() {
        return Err(GalvaniError::InvalidSpec {
            index: 0,
            reason: "at least one layer is required".to_string(),
        });
    }

    let last = elements.len() - 1;
    let mut hidden = Vec::new();
    let mut seen_linear = false;

    for (index, element) in elements[..last].iter().enumerate() {
        let SpecValue::List(items) = element else {
            return Err(GalvaniError::InvalidSpec {
                index,
                reason: format!("each layer must be a list, got a {}", element.kind()),
            });
        };
        if matches!(items.first(), Some(SpecValue::List(_))) {
            return Err(GalvaniError::InvalidSpec {
                index,
                reason: "a group of output heads may only appear as the final element"
                    .to_string(),
            });
        }
        if seen_linear || is_linear_tagged(items) {
            // no going back to spatial layers once the net has flattened
            let out_features = parse_linear(index, items)?;
            hidden.push(LayerSpec::Linear { out_features });
            seen_linear = true;
        } else {
            hidden.push(parse_one(index, items)?);
        }
    }

    let SpecValue::List(items) = &elements[last] else {
        return Err(GalvaniError::InvalidSpec {
            index: last,
            reason: format!("each layer must be a list, got a {}", elements[last].kind()),
        });
    };

    let heads = if matches!(items.first(), Some(SpecValue::List(_))) {
        let mut heads = Vec::with_capacity(items.len());
        for sub in items {
            let SpecValue::List(head_items) = sub else {
                return Err(GalvaniError::InvalidSpec {
                    index: last,
                    reason: format!(
                        "output head group must contain layer lists, got a {}",
                        sub.kind()
                    ),
                });
            };
            heads.push(parse_linear(last, head_items)?);
        }
        heads
    } else if items.is_empty() {
        return Err(GalvaniError::InvalidSpec {
            index: last,
            reason: "layer spec must not be empty".to_string(),
        });
    } else {
        vec![parse_linear(last, items)?]
    };

    if heads.is_empty() {
        return Err(GalvaniError::InvalidSpec {
            index: last,
            reason: "output head group must not be empty".to_string(),
        });
    }

    Ok(NetworkSpec { hidden, heads })
}
