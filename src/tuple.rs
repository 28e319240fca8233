use std::{cmp::Ordering, fmt::Display, str::FromStr, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    page::RecordId,
};

/// Maximum number of bytes stored for a [`FieldType::Text`] value
pub const STRING_LEN: usize = 128;

const INT_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Text,
}

impl FieldType {
    /// The fixed number of bytes a value of this type occupies inside a slot
    pub fn len(&self) -> usize {
        match self {
            FieldType::Int => INT_BYTES,
            FieldType::Text => INT_BYTES + STRING_LEN,
        }
    }

    /// Parse a user supplied literal into a [`Field`] of this type
    pub fn parse(&self, literal: &str) -> DbResult<Field> {
        match self {
            FieldType::Int => literal
                .trim()
                .parse::<i32>()
                .map(Field::Int)
                .map_err(|e| DbError::InvalidValue(format!("{literal:?} is not an int: {e}"))),
            FieldType::Text => {
                if literal.len() > STRING_LEN {
                    return Err(DbError::InvalidValue(format!(
                        "text longer than {STRING_LEN} bytes"
                    )));
                }
                Ok(Field::Text(literal.to_string()))
            }
        }
    }
}

impl FromStr for FieldType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(FieldType::Int),
            "text" | "string" | "varchar" => Ok(FieldType::Text),
            other => Err(DbError::InvalidValue(format!("unknown field type {other:?}"))),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Text => write!(f, "text"),
        }
    }
}

/// Comparison operators usable in a predicate over a single [`Field`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Int(i32),
    Text(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Text(_) => FieldType::Text,
        }
    }

    /// Evaluate `self <op> other`. Values of different types never match.
    pub fn compare(&self, op: CompareOp, other: &Field) -> bool {
        if self.field_type() != other.field_type() {
            return false;
        }
        let ordering = self.cmp(other);
        match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Write the fixed-width encoding of this value into `buf`
    fn write_to(&self, buf: &mut [u8]) {
        match self {
            Field::Int(n) => buf[..INT_BYTES].copy_from_slice(&n.to_be_bytes()),
            Field::Text(s) => {
                let bytes = s.as_bytes();
                let length = bytes.len() as u32;
                buf[..INT_BYTES].copy_from_slice(&length.to_be_bytes());
                let body = &mut buf[INT_BYTES..INT_BYTES + STRING_LEN];
                body[..bytes.len()].copy_from_slice(bytes);
                body[bytes.len()..].fill(0);
            }
        }
    }

    fn read_from(field_type: FieldType, buf: &[u8]) -> DbResult<Self> {
        let prefix: [u8; INT_BYTES] = buf[..INT_BYTES].try_into().unwrap();
        match field_type {
            FieldType::Int => Ok(Field::Int(i32::from_be_bytes(prefix))),
            FieldType::Text => {
                let length = u32::from_be_bytes(prefix) as usize;
                if length > STRING_LEN {
                    return Err(DbError::InvalidValue(format!(
                        "stored text length {length} exceeds {STRING_LEN}"
                    )));
                }
                let bytes = buf[INT_BYTES..INT_BYTES + length].to_vec();
                String::from_utf8(bytes)
                    .map(Field::Text)
                    .map_err(|e| DbError::InvalidValue(e.to_string()))
            }
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(n) => write!(f, "{n}"),
            Field::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdItem {
    pub field_type: FieldType,
    pub name: Option<String>,
}

/// The schema of a tuple: an ordered list of typed, optionally named fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(items: Vec<TdItem>) -> Self {
        assert!(!items.is_empty(), "a tuple desc needs at least one field");
        Self { items }
    }

    pub fn from_types(types: &[FieldType]) -> Self {
        Self::new(
            types
                .iter()
                .map(|&field_type| TdItem {
                    field_type,
                    name: None,
                })
                .collect(),
        )
    }

    pub fn with_names(types: &[FieldType], names: &[&str]) -> Self {
        assert_eq!(types.len(), names.len());
        Self::new(
            types
                .iter()
                .zip(names)
                .map(|(&field_type, name)| TdItem {
                    field_type,
                    name: Some(name.to_string()),
                })
                .collect(),
        )
    }

    /// Parse a schema such as `int,text` or `id:int,name:text`
    pub fn parse(schema: &str) -> DbResult<Self> {
        let items = schema
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| match part.split_once(':') {
                Some((name, ty)) => Ok(TdItem {
                    field_type: ty.parse()?,
                    name: Some(name.trim().to_string()),
                }),
                None => Ok(TdItem {
                    field_type: part.parse()?,
                    name: None,
                }),
            })
            .collect::<DbResult<Vec<_>>>()?;
        if items.is_empty() {
            return Err(DbError::InvalidValue("empty schema".to_string()));
        }
        Ok(Self::new(items))
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.items[i].field_type
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items[i].name.as_deref()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    pub fn types(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.items.iter().map(|item| item.field_type)
    }

    /// Size in bytes of one encoded tuple
    pub fn size(&self) -> usize {
        self.types().map(|t| t.len()).sum()
    }

    /// Schemas are compatible when their type sequences are identical. Names are ignored.
    pub fn is_compatible(&self, other: &TupleDesc) -> bool {
        self.types().eq(other.types())
    }
}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{name}:{}", item.field_type)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        Ok(())
    }
}

/// A row of field values conforming to a [`TupleDesc`]
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> DbResult<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::SchemaMismatch(format!(
                "expected {} fields, got {}",
                desc.num_fields(),
                fields.len()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.field_type() != desc.field_type(i) {
                return Err(DbError::SchemaMismatch(format!(
                    "field {i} is {}, schema says {}",
                    field.field_type(),
                    desc.field_type(i)
                )));
            }
            if let Field::Text(s) = field {
                if s.len() > STRING_LEN {
                    return Err(DbError::InvalidValue(format!(
                        "text longer than {STRING_LEN} bytes"
                    )));
                }
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Encode into `buf`, which must be exactly `desc.size()` bytes
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.desc.size());
        let mut offset = 0;
        for field in &self.fields {
            let len = field.field_type().len();
            field.write_to(&mut buf[offset..offset + len]);
            offset += len;
        }
    }

    pub fn read_from(desc: &Arc<TupleDesc>, buf: &[u8]) -> DbResult<Self> {
        let mut offset = 0;
        let mut fields = Vec::with_capacity(desc.num_fields());
        for field_type in desc.types() {
            let len = field_type.len();
            fields.push(Field::read_from(field_type, &buf[offset..offset + len])?);
            offset += len;
        }
        Ok(Self {
            desc: Arc::clone(desc),
            fields,
            record_id: None,
        })
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tuple_tests {
    use super::*;

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::with_names(
            &[FieldType::Int, FieldType::Text],
            &["id", "name"],
        ))
    }

    #[test]
    fn size_is_sum_of_field_widths() {
        assert_eq!(desc().size(), 4 + 4 + STRING_LEN);
        assert_eq!(TupleDesc::from_types(&[FieldType::Int; 3]).size(), 12);
    }

    #[test]
    fn compatibility_ignores_names() {
        let named = desc();
        let unnamed = TupleDesc::from_types(&[FieldType::Int, FieldType::Text]);
        let swapped = TupleDesc::from_types(&[FieldType::Text, FieldType::Int]);
        assert!(named.is_compatible(&unnamed));
        assert!(!named.is_compatible(&swapped));
        assert_eq!(named.index_of("name"), Some(1));
        assert_eq!(unnamed.index_of("name"), None);
    }

    #[test]
    fn encoding_is_fixed_width_big_endian() {
        let tuple = Tuple::new(desc(), vec![Field::Int(258), Field::Text("ab".into())]).unwrap();
        let mut buf = vec![0xffu8; tuple.desc().size()];
        tuple.write_to(&mut buf);
        assert_eq!(&buf[..4], &[0, 0, 1, 2]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 2]);
        assert_eq!(&buf[8..10], b"ab");
        assert!(buf[10..].iter().all(|&b| b == 0));

        let decoded = Tuple::read_from(tuple.desc(), &buf).unwrap();
        assert_eq!(decoded.fields(), tuple.fields());
        assert!(decoded.record_id().is_none());
    }

    #[test]
    fn construction_validates_against_schema() {
        assert!(matches!(
            Tuple::new(desc(), vec![Field::Int(1)]),
            Err(DbError::SchemaMismatch(_))
        ));
        assert!(matches!(
            Tuple::new(desc(), vec![Field::Text("x".into()), Field::Int(1)]),
            Err(DbError::SchemaMismatch(_))
        ));
        let long = "x".repeat(STRING_LEN + 1);
        assert!(matches!(
            Tuple::new(desc(), vec![Field::Int(1), Field::Text(long)]),
            Err(DbError::InvalidValue(_))
        ));
    }

    #[test]
    fn schema_parsing() {
        let parsed = TupleDesc::parse("id:int, name:text").unwrap();
        assert!(parsed.is_compatible(&desc()));
        assert_eq!(parsed.field_name(0), Some("id"));
        assert!(TupleDesc::parse("int,blob").is_err());
        assert!(TupleDesc::parse("").is_err());
    }

    #[test]
    fn field_comparisons() {
        let five = Field::Int(5);
        assert!(five.compare(CompareOp::Gt, &Field::Int(4)));
        assert!(five.compare(CompareOp::Le, &Field::Int(5)));
        assert!(!five.compare(CompareOp::Ne, &Field::Int(5)));
        assert!(Field::Text("a".into()).compare(CompareOp::Lt, &Field::Text("b".into())));
        assert!(!five.compare(CompareOp::Eq, &Field::Text("5".into())));
    }
}
