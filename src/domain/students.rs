use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static PARENTHESISED_QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*?\)").expect("qualifier pattern is valid"));

/// Canonical name → student id lookup. Matching is exact and case-sensitive.
pub trait StudentDirectory {
    fn student_id(&self, name: &str) -> Option<i64>;
}

impl StudentDirectory for HashMap<String, i64> {
    fn student_id(&self, name: &str) -> Option<i64> {
        self.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedStudent {
    pub name: String,
    pub student_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentResolution {
    pub linked: Vec<LinkedStudent>,
    pub unmatched: Vec<String>,
}

impl StudentResolution {
    pub fn student_ids(&self) -> Vec<i64> {
        self.linked.iter().map(|student| student.student_id).collect()
    }
}

/// Splits a roster like `"John Tan (NUS), Mary Lee (Duke)"` into bare names.
pub fn clean_student_names(students_text: &str) -> Vec<String> {
    students_text
        .split(',')
        .map(|segment| {
            PARENTHESISED_QUALIFIER
                .replace_all(segment, "")
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Best-effort resolution: misses land in `unmatched`, a name listed twice links once.
pub fn resolve_students<D>(students_text: &str, directory: &D) -> StudentResolution
where
    D: StudentDirectory + ?Sized,
{
    let mut resolution = StudentResolution::default();
    let mut seen_ids = HashSet::new();

    for name in clean_student_names(students_text) {
        match directory.student_id(&name) {
            Some(student_id) => {
                if seen_ids.insert(student_id) {
                    resolution.linked.push(LinkedStudent { name, student_id });
                }
            }
            None => resolution.unmatched.push(name),
        }
    }

    resolution
}
