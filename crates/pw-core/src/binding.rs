use std::collections::HashMap;
use std::str::FromStr;

use orion_error::StructError;
use url::Url;

use crate::error::{CoreError, CoreReason};

// ---------------------------------------------------------------------------
// UrlValue — a URL flag value with a mandatory scheme
// ---------------------------------------------------------------------------

/// A URL given on the command line. Parsing enforces the presence of a
/// scheme, since provider dispatch is by scheme alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlValue(pub Url);

impl FromStr for UrlValue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Url::parse(s) {
            Ok(url) => Ok(Self(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Err(StructError::from(CoreReason::Config)
                    .with_detail("a url scheme is required but was not provided".to_string()))
            }
            Err(e) => Err(StructError::from(CoreReason::Config)
                .with_detail(format!("invalid url \"{s}\": {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TagBinding — one `tag=url` flag
// ---------------------------------------------------------------------------

/// One `tag=url` binding from a `-s`/`-t` flag.
#[derive(Debug, Clone)]
pub struct TagBinding {
    pub tag: String,
    pub url: Url,
}

impl FromStr for TagBinding {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((tag, url)) = s.split_once('=') else {
            return Err(StructError::from(CoreReason::Config)
                .with_detail(format!("expected tag=url format of flag, got \"{s}\"")));
        };
        if tag.is_empty() {
            return Err(StructError::from(CoreReason::Config)
                .with_detail(format!("empty tag in \"{s}\"")));
        }
        let url = url.parse::<UrlValue>()?;
        Ok(Self {
            tag: tag.to_string(),
            url: url.0,
        })
    }
}

/// Tag → URL lookup for one side (sources or targets) of a run.
pub type TagMap = HashMap<String, Url>;

/// Collect bindings into a map. A tag repeated on the same side keeps the
/// last binding.
pub fn tag_map(bindings: &[TagBinding]) -> TagMap {
    bindings
        .iter()
        .map(|b| (b.tag.clone(), b.url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_requires_scheme() {
        let err = "./a.txt".parse::<UrlValue>().unwrap_err();
        assert!(format!("{err:?}").contains("scheme is required"));
    }

    #[test]
    fn url_with_scheme_parses() {
        let u = "s3://bucket/some/key".parse::<UrlValue>().unwrap();
        assert_eq!(u.0.scheme(), "s3");
        assert_eq!(u.0.host_str(), Some("bucket"));
        assert_eq!(u.0.path(), "/some/key");
    }

    #[test]
    fn insecure_scheme_parses() {
        let u = "s3+insecure://bucket/key".parse::<UrlValue>().unwrap();
        assert_eq!(u.0.scheme(), "s3+insecure");
    }

    #[test]
    fn binding_splits_on_first_equals() {
        let b = "in=s3://bucket/key?acl=public-read".parse::<TagBinding>().unwrap();
        assert_eq!(b.tag, "in");
        assert_eq!(b.url.query(), Some("acl=public-read"));
    }

    #[test]
    fn binding_rejects_missing_separator() {
        let err = "justatag".parse::<TagBinding>().unwrap_err();
        assert!(format!("{err:?}").contains("tag=url"));
    }

    #[test]
    fn binding_rejects_empty_tag() {
        assert!("=file:///x".parse::<TagBinding>().is_err());
    }

    #[test]
    fn later_binding_wins() {
        let bindings = vec![
            "a=file:///one".parse::<TagBinding>().unwrap(),
            "a=file:///two".parse::<TagBinding>().unwrap(),
        ];
        let map = tag_map(&bindings);
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"].path(), "/two");
    }
}
