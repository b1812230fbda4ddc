//! Request options
//!
//! Options carried with every operation. `acl` is the caller's group; its
//! absence marks a master caller, which bypasses class permissions and
//! row-level ACL filtering.

use serde_json::Value;

use super::error::{CoreError, CoreResult};
use crate::storage::{FindOptions, SortKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Caller groups (user id, role names, `"*"`); `None` for master
    pub acl: Option<Vec<String>>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Vec<SortKey>,
    /// Return the number of matches instead of the matches
    pub count: bool,
}

impl QueryOptions {
    /// Options for a privileged caller
    pub fn master() -> Self {
        Self::default()
    }

    /// Options for a caller holding `groups`
    pub fn with_acl<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acl: Some(groups.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Set the sort from a `{field: 1 | -1}` map
    pub fn sort_from(mut self, spec: &Value) -> CoreResult<Self> {
        let fields = spec
            .as_object()
            .ok_or_else(|| CoreError::validation("sort must be an object of field: 1 | -1"))?;
        for (field, direction) in fields {
            let key = match direction.as_i64() {
                Some(1) => SortKey::asc(field.clone()),
                Some(-1) => SortKey::desc(field.clone()),
                _ => {
                    return Err(CoreError::validation(format!(
                        "sort direction for {} must be 1 or -1",
                        field
                    )))
                }
            };
            self.sort.push(key);
        }
        Ok(self)
    }

    pub fn is_master(&self) -> bool {
        self.acl.is_none()
    }

    pub(crate) fn find_options(&self, sort: Vec<SortKey>) -> FindOptions {
        FindOptions {
            skip: self.skip,
            limit: self.limit,
            sort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders() {
        let options = QueryOptions::with_acl(["u1", "role:admin"])
            .skip(5)
            .limit(10)
            .sort_by(SortKey::desc("createdAt"));
        assert!(!options.is_master());
        assert_eq!(options.acl.as_deref(), Some(&["u1".to_string(), "role:admin".to_string()][..]));
        assert_eq!(options.skip, Some(5));
        assert!(QueryOptions::master().is_master());
    }

    #[test]
    fn test_sort_from_map() {
        let options = QueryOptions::master().sort_from(&json!({"score": -1})).unwrap();
        assert_eq!(options.sort, vec![SortKey::desc("score")]);
        assert!(QueryOptions::master().sort_from(&json!({"score": 2})).is_err());
    }
}
