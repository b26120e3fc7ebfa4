use crate::core::{DbError, Result};

/// Splits `items` into windows of `max_size`; only the last may be smaller.
///
/// Empty input yields no windows.
pub fn chunk<T>(items: Vec<T>, max_size: usize) -> Result<Vec<Vec<T>>> {
    if max_size == 0 {
        return Err(DbError::InvalidArgument(
            "Chunk size must be at least 1".into(),
        ));
    }

    let mut windows = Vec::with_capacity(items.len().div_ceil(max_size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        windows.push(items.by_ref().take(max_size).collect());
    }
    Ok(windows)
}

/// Full windows and the trailing remainder, kept apart so callers can
/// reuse one statement shape for the full ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunks<T> {
    pub full: Vec<Vec<T>>,
    pub remainder: Option<Vec<T>>,
}

impl<T> Chunks<T> {
    pub fn split(items: Vec<T>, max_size: usize) -> Result<Self> {
        let mut full = chunk(items, max_size)?;
        let remainder = match full.last() {
            Some(last) if last.len() < max_size => full.pop(),
            _ => None,
        };
        Ok(Self { full, remainder })
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty() && self.remainder.is_none()
    }

    pub fn window_count(&self) -> usize {
        self.full.len() + usize::from(self.remainder.is_some())
    }
}
