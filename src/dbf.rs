use crate::error::LoadError;
use crate::types::AttrValue;
use encoding_rs::Encoding;
use std::fs;
use std::path::Path;
use thiserror::Error;

const HEADER_SIZE: usize = 32;
const DESCRIPTOR_SIZE: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const FIELD_NAME_SIZE: usize = 11;

#[derive(Debug, Error)]
pub enum DbfError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("table is truncated ({0})")]
    Truncated(&'static str),
}

// Code-page label. WHATWG names plus the Windows `cp949`/`ms949`.
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding, LoadError> {
    let label = label.trim();
    if label.eq_ignore_ascii_case("cp949") || label.eq_ignore_ascii_case("ms949") {
        return Ok(encoding_rs::EUC_KR);
    }
    Encoding::for_label(label.as_bytes()).ok_or_else(|| LoadError::UnknownEncoding {
        label: label.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    kind: u8,
    length: usize,
}

#[derive(Debug, Clone)]
pub struct Table {
    fields: Vec<Field>,
    rows: Vec<Vec<AttrValue>>,
}

impl Table {
    pub fn read(path: &Path, encoding: &'static Encoding) -> Result<Self, DbfError> {
        let bytes = fs::read(path)?;
        Table::parse(&bytes, encoding)
    }

    pub fn parse(bytes: &[u8], encoding: &'static Encoding) -> Result<Self, DbfError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DbfError::Truncated("header"));
        }
        let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        let record_len = usize::from(u16::from_le_bytes([bytes[10], bytes[11]]));
        if bytes.len() < header_len {
            return Err(DbfError::Truncated("field descriptors"));
        }

        let mut fields = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset + DESCRIPTOR_SIZE <= header_len && bytes[offset] != HEADER_TERMINATOR {
            let descriptor = &bytes[offset..offset + DESCRIPTOR_SIZE];
            let raw_name = &descriptor[..FIELD_NAME_SIZE];
            let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(FIELD_NAME_SIZE);
            fields.push(Field {
                name: decode(encoding, &raw_name[..name_end]),
                kind: descriptor[11],
                length: usize::from(descriptor[16]),
            });
            offset += DESCRIPTOR_SIZE;
        }

        let mut rows = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let start = header_len + i * record_len;
            let record = bytes
                .get(start..start + record_len)
                .ok_or(DbfError::Truncated("records"))?;

            // Byte 0 is the deletion flag. Deleted rows stay so rows line up with shapes.
            let mut cursor = 1;
            let mut values = Vec::with_capacity(fields.len());
            for field in &fields {
                let raw = record
                    .get(cursor..cursor + field.length)
                    .ok_or(DbfError::Truncated("record fields"))?;
                values.push(field.value(encoding, raw));
                cursor += field.length;
            }
            rows.push(values);
        }

        Ok(Table { fields, rows })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn value(&self, row: usize, column: usize) -> &AttrValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&AttrValue::Missing)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Field {
    fn value(&self, encoding: &'static Encoding, raw: &[u8]) -> AttrValue {
        match self.kind {
            b'N' | b'F' => {
                let text = String::from_utf8_lossy(raw);
                let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
                if text.is_empty() || text.chars().all(|c| c == '*') {
                    AttrValue::Missing
                } else {
                    text.parse()
                        .map(AttrValue::Number)
                        .unwrap_or_else(|_| AttrValue::Text(text.to_string()))
                }
            }
            b'L' => match raw.first() {
                Some(b'T' | b't' | b'Y' | b'y') => AttrValue::Text("true".to_string()),
                Some(b'F' | b'f' | b'N' | b'n') => AttrValue::Text("false".to_string()),
                _ => AttrValue::Missing,
            },
            _ => {
                let text = decode(encoding, raw);
                if text.is_empty() {
                    AttrValue::Missing
                } else {
                    AttrValue::Text(text)
                }
            }
        }
    }
}

fn decode(encoding: &'static Encoding, raw: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(raw);
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string()
}

/// Reads a `.shp` with the sibling `.dbf`, one attribute row per shape.
pub fn read_shapefile(
    dataset: &'static str,
    path: &Path,
    encoding: &'static Encoding,
) -> Result<(Vec<shapefile::Shape>, Table), LoadError> {
    let shp_err = |source: shapefile::Error| LoadError::Shapefile {
        dataset,
        path: path.to_path_buf(),
        source,
    };
    let mut reader = shapefile::ShapeReader::from_path(path).map_err(shp_err)?;
    let shapes = reader
        .iter_shapes()
        .collect::<Result<Vec<_>, _>>()
        .map_err(shp_err)?;

    let dbf_path = path.with_extension("dbf");
    let table = Table::read(&dbf_path, encoding).map_err(|source| LoadError::Dbase {
        dataset,
        path: dbf_path.clone(),
        source,
    })?;

    if table.len() != shapes.len() {
        return Err(LoadError::AttributeMismatch {
            dataset,
            path: dbf_path,
            shapes: shapes.len(),
            records: table.len(),
        });
    }

    Ok((shapes, table))
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_table;
    use super::*;

    #[test]
    fn decodes_cp949_field_names_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.dbf");
        let cp949 = encoding_for_label("cp949").unwrap();
        write_table(
            &path,
            cp949,
            &[("SIG_CD", b'C', 5), ("SIG_KOR_NM", b'C', 20), ("사고위험등", b'N', 4)],
            &[vec!["11200", "성동구", "4"], vec!["11215", "광진구", ""]],
        );

        let table = Table::read(&path, cp949).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.fields()[2].name, "사고위험등");

        let name = table.column("SIG_KOR_NM").unwrap();
        assert_eq!(table.value(0, name), &AttrValue::Text("성동구".to_string()));
        assert_eq!(table.value(1, name), &AttrValue::Text("광진구".to_string()));

        let tier = table.column("사고위험등").unwrap();
        assert_eq!(table.value(0, tier), &AttrValue::Number(4.0));
        assert_eq!(table.value(1, tier), &AttrValue::Missing);
    }

    #[test]
    fn wrong_code_page_does_not_round_trip_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.dbf");
        write_table(
            &path,
            encoding_rs::EUC_KR,
            &[("SIG_KOR_NM", b'C', 20)],
            &[vec!["강남구"]],
        );

        let table = Table::read(&path, encoding_rs::UTF_8).unwrap();
        assert_ne!(table.value(0, 0), &AttrValue::Text("강남구".to_string()));
    }

    #[test]
    fn labels_resolve_to_code_pages() {
        assert_eq!(encoding_for_label("CP949").unwrap(), encoding_rs::EUC_KR);
        assert_eq!(encoding_for_label("euc-kr").unwrap(), encoding_rs::EUC_KR);
        assert_eq!(encoding_for_label("utf-8").unwrap(), encoding_rs::UTF_8);
        assert!(matches!(
            encoding_for_label("klingon"),
            Err(LoadError::UnknownEncoding { .. })
        ));
    }

    #[test]
    fn truncated_table_is_an_error() {
        let err = Table::parse(&[0x03, 0, 0], encoding_rs::UTF_8).unwrap_err();
        assert!(matches!(err, DbfError::Truncated(_)));
    }
}
