use std::fmt;

/// Ordered collection of failures gathered over one run.
///
/// Concurrent activities all report into the same aggregate; entries keep
/// the order in which failures were recorded. An aggregate that exists but
/// holds no entries is meaningful on its own: teardown inspects
/// [`is_empty`](Self::is_empty) to decide whether created targets must be
/// destroyed, and callers use [`into_option`](Self::into_option) where
/// "no aggregate at all" is the interesting distinction.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single failure.
    pub fn push(&mut self, err: impl Into<anyhow::Error>) {
        self.errors.push(err.into());
    }

    /// Merge another aggregate into this one, preserving entry order.
    /// Merging never nests: the entries are flattened into one list.
    pub fn merge(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    /// Record the failure of `result`, ignoring `Ok`. Returns whether a
    /// failure was recorded.
    pub fn catch<T, E>(&mut self, result: Result<T, E>) -> bool
    where
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(_) => false,
            Err(e) => {
                self.errors.push(e.into());
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<anyhow::Error> {
        self.errors
    }

    /// `None` when no failure was recorded, the aggregate otherwise.
    pub fn into_option(self) -> Option<MultiError> {
        if self.errors.is_empty() { None } else { Some(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) errors", self.errors.len())
    }
}

impl From<anyhow::Error> for MultiError {
    fn from(err: anyhow::Error) -> Self {
        Self { errors: vec![err] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregate_is_distinguishable() {
        let mu = MultiError::new();
        assert!(mu.is_empty());
        assert_eq!(mu.len(), 0);
        assert!(mu.into_option().is_none());
    }

    #[test]
    fn catch_records_only_failures() {
        let mut mu = MultiError::new();
        assert!(!mu.catch(Ok::<_, std::io::Error>(42)));
        assert!(mu.catch(Err::<(), _>(std::io::Error::other("boom"))));
        assert_eq!(mu.len(), 1);
    }

    #[test]
    fn merge_flattens_in_order() {
        let mut a = MultiError::new();
        a.push(anyhow::anyhow!("first"));

        let mut b = MultiError::new();
        b.push(anyhow::anyhow!("second"));
        b.push(anyhow::anyhow!("third"));

        a.merge(b);
        assert_eq!(a.len(), 3);
        let texts: Vec<String> = a.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn display_reports_count() {
        let mut mu = MultiError::new();
        mu.push(anyhow::anyhow!("x"));
        mu.push(anyhow::anyhow!("y"));
        assert_eq!(mu.to_string(), "(2) errors");
    }
}
