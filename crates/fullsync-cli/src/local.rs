//! Local filesystem backend.
//!
//! Lets the orchestrator run end to end without a search server. Content is
//! read from JSON files and "indices" are directories of JSON documents:
//!
//! ```text
//! <content_dir>/global/<slug>/<id>.json      content of global indexables
//! <content_dir>/<tenant>/<slug>/<id>.json    content of per-tenant indexables
//! <index_dir>/<index>/_mapping.json          written by put_mapping
//! <index_dir>/<index>/<id>.json              indexed documents
//! <index_dir>/_aliases/<alias>.json          alias -> list of indices
//! ```
//!
//! The backend is configured from the `[local]` section of the config file.

use anyhow::Context;
use chrono::Utc;
use fullsync_core::{
    BulkItem, BulkResponse, ContentObject, Indexable, Labels, QueryArgs, QueryResult,
    StaticRegistry, Tenant, TenantDirectory, TenantId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// `[local]` section of the config file.
///
/// ```toml
/// [local]
/// content_dir = "content"
/// index_dir = "indices"
/// index_prefix = "fullsync"
/// multi_tenant = true
///
/// [[local.tenants]]
/// id = 1
/// url = "https://one.example"
///
/// [[local.indexables]]
/// slug = "post"
/// singular = "Post"
/// plural = "Posts"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Root of the content files
    pub content_dir: PathBuf,

    /// Root of the index directories
    pub index_dir: PathBuf,

    /// Prefix of every index and alias name
    pub index_prefix: String,

    /// Run one index per tenant and build aliases
    pub multi_tenant: bool,

    /// Known tenants; the first one is active by default
    pub tenants: Vec<TenantConfig>,

    /// Content types to index
    pub indexables: Vec<IndexableConfig>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            content_dir: PathBuf::from("content"),
            index_dir: PathBuf::from("indices"),
            index_prefix: "fullsync".to_string(),
            multi_tenant: false,
            tenants: vec![TenantConfig {
                id: 1,
                url: "http://localhost".to_string(),
                indexable: true,
            }],
            indexables: vec![IndexableConfig {
                slug: "post".to_string(),
                singular: "Post".to_string(),
                plural: "Posts".to_string(),
                global: false,
            }],
        }
    }
}

/// A tenant of the local deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant id, also the content subdirectory name
    pub id: u64,

    /// Base URL
    pub url: String,

    /// Whether the tenant takes part in syncs
    #[serde(default = "default_true")]
    pub indexable: bool,
}

/// A content type of the local deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexableConfig {
    /// Registered name, also the content subdirectory name
    pub slug: String,

    /// Singular label
    pub singular: String,

    /// Plural label
    pub plural: String,

    /// One index for all tenants
    #[serde(default)]
    pub global: bool,
}

fn default_true() -> bool {
    true
}

/// Wrapper used to read only the `[local]` section of the config file
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    local: LocalConfig,
}

impl LocalConfig {
    /// Load the `[local]` section, falling back to defaults when the file
    /// or the section is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using local defaults");
            return Ok(LocalConfig::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(file.local)
    }

    /// Build the tenant directory and indexable registry for this config
    pub fn build(&self) -> (Arc<LocalTenants>, StaticRegistry) {
        let tenants = Arc::new(LocalTenants::new(self));
        let mut registry = StaticRegistry::new();

        for indexable in &self.indexables {
            let local = Arc::new(LocalIndexable {
                labels: Labels::new(&indexable.singular, &indexable.plural),
                config: indexable.clone(),
                content_dir: self.content_dir.clone(),
                index_dir: self.index_dir.clone(),
                prefix: self.index_prefix.clone(),
                tenants: Arc::clone(&tenants),
            });
            registry = if indexable.global {
                registry.with_global(local)
            } else {
                registry.with_per_tenant(local)
            };
        }

        (tenants, registry)
    }
}

/// Tenant directory with an in-process stack of active tenants.
#[derive(Debug)]
pub struct LocalTenants {
    multi_tenant: bool,
    tenants: Vec<Tenant>,
    default: TenantId,
    stack: Mutex<Vec<TenantId>>,
}

impl LocalTenants {
    /// Create the directory described by `config`
    pub fn new(config: &LocalConfig) -> Self {
        let tenants: Vec<Tenant> = config
            .tenants
            .iter()
            .map(|t| Tenant::new(TenantId(t.id), &t.url).with_indexable(t.indexable))
            .collect();
        let default = tenants.first().map_or(TenantId(1), |t| t.id);

        LocalTenants {
            multi_tenant: config.multi_tenant,
            tenants,
            default,
            stack: Mutex::new(Vec::new()),
        }
    }

    /// The tenant currently in context
    pub fn active(&self) -> TenantId {
        self.stack.lock().last().copied().unwrap_or(self.default)
    }
}

impl TenantDirectory for LocalTenants {
    fn is_multi_tenant(&self) -> bool {
        self.multi_tenant
    }

    fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        Ok(self.tenants.clone())
    }

    fn current(&self) -> anyhow::Result<Tenant> {
        let id = self.active();
        self.tenants
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("site {} is not configured", id))
    }

    fn activate(&self, id: TenantId) -> anyhow::Result<()> {
        if !self.tenants.iter().any(|t| t.id == id) {
            anyhow::bail!("unknown site {}", id);
        }
        self.stack.lock().push(id);
        Ok(())
    }

    fn restore(&self) {
        self.stack.lock().pop();
    }
}

/// One content type backed by JSON files.
pub struct LocalIndexable {
    config: IndexableConfig,
    labels: Labels,
    content_dir: PathBuf,
    index_dir: PathBuf,
    prefix: String,
    tenants: Arc<LocalTenants>,
}

impl LocalIndexable {
    /// Directory holding the content of the active tenant
    fn source_dir(&self) -> PathBuf {
        let scope = if self.config.global {
            "global".to_string()
        } else {
            self.tenants.active().to_string()
        };
        self.content_dir.join(scope).join(&self.config.slug)
    }

    fn index_path(&self) -> PathBuf {
        self.index_dir.join(self.index_name())
    }

    /// Sorted ids of the content files of the active tenant
    fn list_ids(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.source_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_source(&self, id: &str) -> std::io::Result<String> {
        fs::read_to_string(self.source_dir().join(format!("{}.json", id)))
    }

    /// Index one document, returning its bulk outcome
    fn index_document(&self, target: &Path, id: &str) -> anyhow::Result<BulkItem> {
        let raw = match self.read_source(id) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(BulkItem::failed(id, "document_missing_exception", "source file not found"));
            }
            Err(e) => return Err(e.into()),
        };
        let source: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => return Ok(BulkItem::failed(id, "mapper_parsing_exception", e.to_string())),
        };

        let tenant = (!self.config.global).then(|| self.tenants.active().as_u64());
        let document = json!({
            "id": id,
            "indexable": self.config.slug,
            "tenant": tenant,
            "source": source,
        });
        fs::write(
            target.join(format!("{}.json", id)),
            serde_json::to_vec_pretty(&document)?,
        )?;
        Ok(BulkItem::ok(id))
    }
}

impl Indexable for LocalIndexable {
    fn slug(&self) -> &str {
        &self.config.slug
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn delete_index(&self) -> anyhow::Result<()> {
        let path = self.index_path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(index = %self.index_name(), "Index deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    fn put_mapping(&self) -> anyhow::Result<()> {
        let path = self.index_path();
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mapping = json!({
            "indexable": self.config.slug,
            "global": self.config.global,
            "created_at": Utc::now().to_rfc3339(),
        });
        fs::write(path.join("_mapping.json"), serde_json::to_vec_pretty(&mapping)?)?;
        Ok(())
    }

    fn query(&self, args: &QueryArgs) -> anyhow::Result<QueryResult> {
        let ids = self.list_ids()?;
        let total = ids.len() as u64;

        let objects = ids
            .into_iter()
            .skip(usize::try_from(args.offset).unwrap_or(usize::MAX))
            .take(args.per_page)
            .map(|id| {
                let data = self
                    .read_source(&id)
                    .ok()
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(Value::Null);
                ContentObject::new(id).with_data(data)
            })
            .collect();

        Ok(QueryResult { total, objects })
    }

    fn bulk_index(&self, ids: &[String]) -> anyhow::Result<BulkResponse> {
        let target = self.index_path();
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create index {}", self.index_name()))?;

        let items = ids
            .iter()
            .map(|id| self.index_document(&target, id))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Bulk request to {} failed", self.index_name()))?;

        Ok(BulkResponse::from_items(items))
    }

    fn index_name(&self) -> String {
        if self.config.global || !self.tenants.is_multi_tenant() {
            format!("{}-{}", self.prefix, self.config.slug)
        } else {
            format!("{}-{}-{}", self.prefix, self.config.slug, self.tenants.active())
        }
    }

    fn create_alias(&self, indices: &[String]) -> anyhow::Result<()> {
        if let Some(missing) = indices.iter().find(|i| !self.index_dir.join(i).is_dir()) {
            anyhow::bail!("index {} does not exist", missing);
        }

        let alias = format!("{}-{}", self.prefix, self.config.slug);
        let dir = self.index_dir.join("_aliases");
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}.json", alias)),
            serde_json::to_vec_pretty(indices)?,
        )?;

        info!(alias = %alias, indices = indices.len(), "Alias written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fullsync_core::{IndexableRegistry, TenantScope};
    use tempfile::TempDir;

    fn config(root: &Path, multi_tenant: bool) -> LocalConfig {
        LocalConfig {
            content_dir: root.join("content"),
            index_dir: root.join("indices"),
            index_prefix: "test".to_string(),
            multi_tenant,
            tenants: vec![
                TenantConfig {
                    id: 1,
                    url: "https://one.example".to_string(),
                    indexable: true,
                },
                TenantConfig {
                    id: 2,
                    url: "https://two.example".to_string(),
                    indexable: true,
                },
            ],
            indexables: vec![
                IndexableConfig {
                    slug: "post".to_string(),
                    singular: "Post".to_string(),
                    plural: "Posts".to_string(),
                    global: false,
                },
                IndexableConfig {
                    slug: "user".to_string(),
                    singular: "User".to_string(),
                    plural: "Users".to_string(),
                    global: true,
                },
            ],
        }
    }

    fn write_content(root: &Path, scope: &str, slug: &str, id: &str, body: &str) {
        let dir = root.join("content").join(scope).join(slug);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.json", id)), body).unwrap();
    }

    #[test]
    fn test_load_missing_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fullsync.toml");
        fs::write(&path, "[sync]\nper_page = 5\n").unwrap();

        let config = LocalConfig::load_from(&path).unwrap();
        assert_eq!(config.index_prefix, "fullsync");
        assert_eq!(config.indexables.len(), 1);
    }

    #[test]
    fn test_load_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fullsync.toml");
        fs::write(
            &path,
            r#"
[local]
multi_tenant = true
index_prefix = "shop"

[[local.tenants]]
id = 7
url = "https://seven.example"
indexable = false

[[local.indexables]]
slug = "product"
singular = "Product"
plural = "Products"
"#,
        )
        .unwrap();

        let config = LocalConfig::load_from(&path).unwrap();
        assert!(config.multi_tenant);
        assert_eq!(config.tenants[0].id, 7);
        assert!(!config.tenants[0].indexable);
        assert!(!config.indexables[0].global);
    }

    #[test]
    fn test_registry_split() {
        let temp_dir = TempDir::new().unwrap();
        let (_, registry) = config(temp_dir.path(), true).build();

        assert_eq!(registry.names(false), vec!["post"]);
        assert_eq!(registry.names(true), vec!["user"]);
        assert!(registry.get("user").is_some());
    }

    #[test]
    fn test_query_pages_sorted_ids() {
        let temp_dir = TempDir::new().unwrap();
        for id in ["c", "a", "b"] {
            write_content(temp_dir.path(), "1", "post", id, r#"{"title":"x"}"#);
        }
        let (_, registry) = config(temp_dir.path(), false).build();
        let post = registry.get("post").unwrap();

        let page = post.query(&QueryArgs { per_page: 2, offset: 1 }).unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.objects.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(page.objects[0].data["title"], "x");
    }

    #[test]
    fn test_bulk_index_reports_bad_documents() {
        let temp_dir = TempDir::new().unwrap();
        write_content(temp_dir.path(), "1", "post", "1", r#"{"title":"ok"}"#);
        write_content(temp_dir.path(), "1", "post", "2", "{broken");
        let (_, registry) = config(temp_dir.path(), false).build();
        let post = registry.get("post").unwrap();

        let response = post
            .bulk_index(&["1".to_string(), "2".to_string(), "3".to_string()])
            .unwrap();
        assert!(response.errors);
        let failed: Vec<_> = response.failed_items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(failed, vec!["2", "3"]);
        assert!(temp_dir.path().join("indices/test-post/1.json").exists());
    }

    #[test]
    fn test_tenant_scoped_index_names() {
        let temp_dir = TempDir::new().unwrap();
        let (tenants, registry) = config(temp_dir.path(), true).build();
        let post = registry.get("post").unwrap();
        let user = registry.get("user").unwrap();

        assert_eq!(post.index_name(), "test-post-1");
        {
            let _scope = TenantScope::enter(&*tenants, TenantId(2)).unwrap();
            assert_eq!(tenants.current().unwrap().url, "https://two.example");
            assert_eq!(post.index_name(), "test-post-2");
            assert_eq!(user.index_name(), "test-user");
        }
        assert_eq!(post.index_name(), "test-post-1");
        assert_eq!(tenants.current().unwrap().id, TenantId(1));
        assert!(tenants.activate(TenantId(9)).is_err());
    }

    #[test]
    fn test_mapping_and_alias() {
        let temp_dir = TempDir::new().unwrap();
        let (tenants, registry) = config(temp_dir.path(), true).build();
        let post = registry.get("post").unwrap();

        let indices = vec!["test-post-1".to_string(), "test-post-2".to_string()];
        post.put_mapping().unwrap();
        assert!(post.create_alias(&indices).is_err());

        {
            let _scope = TenantScope::enter(&*tenants, TenantId(2)).unwrap();
            post.put_mapping().unwrap();
        }
        post.create_alias(&indices).unwrap();

        let alias = fs::read_to_string(temp_dir.path().join("indices/_aliases/test-post.json")).unwrap();
        let names: Vec<String> = serde_json::from_str(&alias).unwrap();
        assert_eq!(names, vec!["test-post-1", "test-post-2"]);

        post.delete_index().unwrap();
        post.delete_index().unwrap();
        assert!(!temp_dir.path().join("indices/test-post-1").exists());
    }
}
