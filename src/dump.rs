//! Format parsed field trees for display (dump text, one-line summaries).

use crate::field::{CustomPayload, FieldNode, StructField};
use crate::value::{ArrayValues, Value};

/// Raw scalar string; strings are quoted, the null string prints as `null`.
pub fn format_scalar_raw(v: &Value) -> String {
    v.to_string()
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// `hex(..)` for unsigned byte arrays, `[a, b, ..]` otherwise.
pub fn format_array(values: &ArrayValues) -> String {
    match values {
        ArrayValues::UByte(b) => format!("hex({})", hex_string(b)),
        other => {
            let items: Vec<String> = other.iter().map(|v| format_scalar_raw(&v)).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn label(node: &FieldNode) -> &str {
    node.name().unwrap_or("_")
}

/// Multi-line rendering of one node, indented by `indent` levels.
pub fn field_to_dump(node: &FieldNode, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match node {
        FieldNode::Primitive(f) => {
            format!("{}{}: {} = {}", pad, label(node), f.value.kind(), format_scalar_raw(&f.value))
        }
        FieldNode::Array(f) => format!(
            "{}{}: {}[{}] = {}",
            pad,
            label(node),
            f.values.kind(),
            f.values.len(),
            format_array(&f.values)
        ),
        FieldNode::Struct(s) => {
            let mut lines = vec![format!("{}{}: struct {{", pad, label(node))];
            lines.extend(s.fields.iter().map(|f| field_to_dump(f, indent + 1)));
            lines.push(format!("{}}}", pad));
            lines.join("\n")
        }
        FieldNode::StructArray(a) => {
            if a.is_empty() {
                return format!("{}{}: struct[0] []", pad, label(node));
            }
            let mut lines = vec![format!("{}{}: struct[{}] [", pad, label(node), a.len())];
            for (i, element) in a.elements.iter().enumerate() {
                lines.push(format!("{}  [{}] {{", pad, i));
                lines.extend(element.fields.iter().map(|f| field_to_dump(f, indent + 2)));
                lines.push(format!("{}  }}", pad));
            }
            lines.push(format!("{}]", pad));
            lines.join("\n")
        }
        FieldNode::Custom(c) => {
            let rendered = match &c.payload {
                CustomPayload::Scalar(v) => format_scalar_raw(v),
                CustomPayload::Array(values) => format_array(values),
            };
            format!("{}{}: {} = {}", pad, label(node), c.type_params.type_name, rendered)
        }
    }
}

/// All children of the root, one block per field.
pub fn struct_to_dump(root: &StructField) -> String {
    root.fields
        .iter()
        .map(|f| field_to_dump(f, 0))
        .collect::<Vec<_>>()
        .join("\n")
}
