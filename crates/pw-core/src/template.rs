use std::collections::HashMap;
use std::path::PathBuf;

use orion_error::StructError;

use crate::binding::TagMap;
use crate::error::{CoreReason, CoreResult};
use crate::pipe::{PipeManager, SourcePipe, TargetPipe};

const OPEN: &str = "%{";
const CLOSE: char = '}';

// ---------------------------------------------------------------------------
// ArgTemplater — %{tag} expansion over argv
// ---------------------------------------------------------------------------

/// Rewrites argv by replacing `%{tag}` placeholders with FIFO paths.
///
/// Pipes are created on first reference only: a tag that is bound but never
/// referenced allocates no FIFO and opens no remote stream. Repeated
/// references to one tag share a single pipe. An unterminated `%{` and any
/// stray `%`/`{`/`}` are literal text.
pub struct ArgTemplater<'a> {
    pipes: &'a PipeManager<'a>,
    source_tags: &'a TagMap,
    target_tags: &'a TagMap,
    resolved: HashMap<String, PathBuf>,
    /// Pipes materialised so far, in first-reference order. Populated even
    /// when a later argument fails, so the caller can tear them down.
    pub sources: Vec<SourcePipe>,
    pub targets: Vec<TargetPipe>,
}

impl<'a> ArgTemplater<'a> {
    pub fn new(
        pipes: &'a PipeManager<'a>,
        source_tags: &'a TagMap,
        target_tags: &'a TagMap,
    ) -> Self {
        Self {
            pipes,
            source_tags,
            target_tags,
            resolved: HashMap::new(),
            sources: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Expand every argv element in order.
    pub async fn expand(&mut self, args: &[String]) -> CoreResult<Vec<String>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.expand_one(arg).await?);
        }
        Ok(out)
    }

    async fn expand_one(&mut self, arg: &str) -> CoreResult<String> {
        let mut out = String::with_capacity(arg.len());
        let mut rest = arg;
        while let Some(start) = rest.find(OPEN) {
            let after = &rest[start + OPEN.len()..];
            let Some(end) = after.find(CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            let tag = after[..end].trim();
            let path = self.resolve(tag).await?;
            out.push_str(&path);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    async fn resolve(&mut self, tag: &str) -> CoreResult<String> {
        if let Some(path) = self.resolved.get(tag) {
            return Ok(path.display().to_string());
        }

        let source_url = self.source_tags.get(tag);
        let target_url = self.target_tags.get(tag);
        match (source_url, target_url) {
            (Some(_), Some(_)) => Err(StructError::from(CoreReason::Config)
                .with_detail(format!("tag \"{tag}\" described as both source and target"))),
            (None, None) => Err(StructError::from(CoreReason::Config)
                .with_detail(format!("tag \"{tag}\" not defined in sources or targets"))),
            (Some(url), None) => {
                let pipe = self.pipes.source(url).await?;
                let path = pipe.path.display().to_string();
                self.resolved.insert(tag.to_string(), pipe.path.clone());
                self.sources.push(pipe);
                Ok(path)
            }
            (None, Some(url)) => {
                let pipe = self.pipes.target(url).await?;
                let path = pipe.path.display().to_string();
                self.resolved.insert(tag.to_string(), pipe.path.clone());
                self.targets.push(pipe);
                Ok(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use url::Url;

    use crate::provider::{FileProvider, ProviderSet};

    use super::*;

    struct Fixture {
        scratch: TempDir,
        data: TempDir,
        providers: ProviderSet,
        sources: TagMap,
        targets: TagMap,
    }

    impl Fixture {
        fn new() -> Self {
            let scratch = TempDir::new().unwrap();
            let data = TempDir::new().unwrap();
            let providers = ProviderSet::new(vec![Box::new(FileProvider::default())]);
            Self {
                scratch,
                data,
                providers,
                sources: TagMap::new(),
                targets: TagMap::new(),
            }
        }

        fn bind_source(&mut self, tag: &str, file: &str, contents: &[u8]) {
            let path = self.data.path().join(file);
            std::fs::write(&path, contents).unwrap();
            let url = Url::parse(&format!("file://{}", path.display())).unwrap();
            self.sources.insert(tag.to_string(), url);
        }

        fn bind_target(&mut self, tag: &str, file: &str) {
            let path = self.data.path().join(file);
            let url = Url::parse(&format!("file://{}", path.display())).unwrap();
            self.targets.insert(tag.to_string(), url);
        }

        fn scratch_entries(&self) -> usize {
            std::fs::read_dir(self.scratch.path()).unwrap().count()
        }
    }

    async fn expand(fx: &Fixture, args: &[&str]) -> CoreResult<(Vec<String>, usize, usize)> {
        let manager = PipeManager::new(fx.scratch.path(), &fx.providers);
        let mut templater = ArgTemplater::new(&manager, &fx.sources, &fx.targets);
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let out = templater.expand(&args).await?;
        Ok((out, templater.sources.len(), templater.targets.len()))
    }

    #[tokio::test]
    async fn replaces_tags_with_fifo_paths() {
        let mut fx = Fixture::new();
        fx.bind_source("in", "a.txt", b"hello");
        fx.bind_target("out", "b.txt");

        let (args, sources, targets) = expand(&fx, &["cp", "%{in}", "%{ out }"]).await.unwrap();
        assert_eq!(args[0], "cp");
        assert!(args[1].starts_with(fx.scratch.path().to_str().unwrap()));
        assert!(args[2].starts_with(fx.scratch.path().to_str().unwrap()));
        assert_eq!((sources, targets), (1, 1));
        assert_eq!(fx.scratch_entries(), 2);
    }

    #[tokio::test]
    async fn repeated_references_share_one_pipe() {
        let mut fx = Fixture::new();
        fx.bind_source("in", "a.txt", b"hello");

        let (args, sources, _) = expand(&fx, &["%{in}", "%{in}"]).await.unwrap();
        assert_eq!(args[0], args[1]);
        assert_eq!(sources, 1);
        assert_eq!(fx.scratch_entries(), 1);
    }

    #[tokio::test]
    async fn unreferenced_tags_allocate_nothing() {
        let mut fx = Fixture::new();
        fx.bind_source("unused", "missing-on-purpose.txt", b"");
        std::fs::remove_file(fx.data.path().join("missing-on-purpose.txt")).unwrap();

        // The bound file does not even exist; expansion must not try to
        // open it because nothing references the tag.
        let (args, sources, targets) = expand(&fx, &["echo", "plain"]).await.unwrap();
        assert_eq!(args, vec!["echo", "plain"]);
        assert_eq!((sources, targets), (0, 0));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn undefined_tag_fails() {
        let fx = Fixture::new();
        let err = expand(&fx, &["cmd", "%{ghost}"]).await.unwrap_err();
        assert!(format!("{err:?}").contains("not defined in sources or targets"));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn tag_on_both_sides_fails() {
        let mut fx = Fixture::new();
        fx.bind_source("a", "x.txt", b"");
        fx.bind_target("a", "y.txt");

        let err = expand(&fx, &["cmd", "%{a}"]).await.unwrap_err();
        assert!(format!("{err:?}").contains("described as both source and target"));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn stray_delimiters_are_literal() {
        let mut fx = Fixture::new();
        fx.bind_source("in", "a.txt", b"");

        let (args, _, _) = expand(&fx, &["100%", "a{b}c", "%{in}%{", "%}"]).await.unwrap();
        assert_eq!(args[0], "100%");
        assert_eq!(args[1], "a{b}c");
        assert!(args[2].ends_with("%{"));
        assert_eq!(args[3], "%}");
    }
}
