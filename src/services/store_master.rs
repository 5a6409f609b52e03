use std::collections::HashSet;
use std::path::Path;

/// Header naming the store identifier column.
const STORE_ID_HEADER: &str = "storeid";

/// Column used when the header row does not name a store id column.
const FALLBACK_STORE_ID_COLUMN: usize = 2;

/// Authoritative set of valid store identifiers.
///
/// Loaded once at startup and immutable afterwards, so it can be shared
/// behind an `Arc` by every running job without locking.
#[derive(Debug, Clone, Default)]
pub struct StoreMaster {
    store_ids: HashSet<String>,
}

impl StoreMaster {
    /// Load store ids from a CSV file whose first row is a header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreMasterError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| StoreMasterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let master = Self::parse(&data)?;

        tracing::info!(
            path = %path.display(),
            stores = master.len(),
            "Loaded store master"
        );

        Ok(master)
    }

    /// Parse raw CSV bytes.
    pub fn parse(data: &[u8]) -> Result<Self, StoreMasterError> {
        let text = std::str::from_utf8(data).map_err(|_| StoreMasterError::InvalidUtf8)?;
        let mut lines = text.lines();

        let header_line = lines.next().ok_or(StoreMasterError::Empty)?;
        let headers = parse_csv_line(header_line);
        let column = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(STORE_ID_HEADER))
            .unwrap_or(FALLBACK_STORE_ID_COLUMN);

        let store_ids = lines
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let mut values = parse_csv_line(line);
                if values.len() <= column {
                    return None;
                }
                let id = values.swap_remove(column).trim().to_string();
                (!id.is_empty()).then_some(id)
            })
            .collect();

        Ok(Self { store_ids })
    }

    pub fn contains(&self, store_id: &str) -> bool {
        self.store_ids.contains(store_id)
    }

    pub fn len(&self) -> usize {
        self.store_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store_ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for StoreMaster {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            store_ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Split a CSV line, honouring double-quoted fields.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == ',' {
            result.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    result.push(current);
    result
}

#[derive(Debug, thiserror::Error)]
pub enum StoreMasterError {
    #[error("Failed to read store master {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store master is not valid UTF-8")]
    InvalidUtf8,

    #[error("Store master is empty")]
    Empty,
}
