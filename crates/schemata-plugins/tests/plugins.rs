//! Plugins running inside the full pipeline against the in-memory store.

use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use schemata_core::{
    Actor, ConfigurationError, Cx, Error, FieldDeclaration, Filter, FindOptions, OperationRequest,
    Outcome, Record, SortDirection, Value, json,
};
use schemata_engine::Engine;
use schemata_memory::MemoryStore;
use schemata_plugins::{
    CacheConfig, CacheExt, CascadeRule, InvalidationStrategy, SeoConfig, SnapshotMode,
    SoftDeleteConfig, SoftDeleteExt, VersioningConfig, VersioningExt, cache, seo, soft_delete,
    versioning,
};
use schemata_schema::{CollectionDeclaration, SchemaResolver};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn unwrap_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

fn rec(v: Value) -> Record {
    match v {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

fn engine(collections: Vec<CollectionDeclaration>, store: &MemoryStore) -> Arc<Engine> {
    let schema = SchemaResolver::default().resolve(collections).unwrap();
    Arc::new(Engine::new(Arc::new(schema), Arc::new(store.clone())))
}

fn articles(config: VersioningConfig) -> CollectionDeclaration {
    CollectionDeclaration::builder("articles")
        .field("title", FieldDeclaration::text().required())
        .field("body", FieldDeclaration::text())
        .field("views", FieldDeclaration::integer())
        .plugin(versioning(config))
        .build()
}

#[test]
fn versions_are_numbered_per_record() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let articles = engine(vec![articles(VersioningConfig::new())], &store)
        .handle("articles")
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(articles.create(&cx, rec(json!({"title": "One"}))).await);
        unwrap_outcome(articles.create(&cx, rec(json!({"title": "Other"}))).await);
        for text in ["Two", "Three"] {
            unwrap_outcome(
                articles
                    .update_by_id(&cx, 1, rec(json!({ "title": text })))
                    .await,
            );
        }

        let versions = unwrap_outcome(articles.get_versions(&cx, json!(1)).await);
        let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(
            versions[2].snapshot.as_ref().map(|s| s["title"].clone()),
            Some(json!("Three"))
        );
        assert_eq!(versions[1].diff["title"].from, json!("One"));
        assert_eq!(versions[1].diff["title"].to, json!("Two"));
        assert!(versions.iter().all(|v| v.created_at.is_some()));

        let other = unwrap_outcome(articles.get_versions(&cx, json!(2)).await);
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].version, 1);

        let second = unwrap_outcome(articles.get_version(&cx, json!(1), 2).await);
        assert_eq!(second.version, 2);
        let missing = unwrap_err(articles.get_version(&cx, json!(1), 9).await);
        assert!(matches!(missing, Error::NotFound { .. }));
    });
    assert_eq!(store.records("articles_versions").len(), 4);
}

#[test]
fn restore_writes_a_new_version() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let articles = engine(
        vec![articles(VersioningConfig::new().mode(SnapshotMode::Diff))],
        &store,
    )
    .handle("articles")
    .unwrap();

    rt.block_on(async {
        unwrap_outcome(
            articles
                .create(&cx, rec(json!({"title": "Draft", "body": "first"})))
                .await,
        );
        unwrap_outcome(
            articles
                .update_by_id(&cx, 1, rec(json!({"title": "Final", "views": 3})))
                .await,
        );

        let diff = unwrap_outcome(articles.compare_versions(&cx, json!(1), 1, 2).await);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["title", "views"]);
        assert_eq!(diff["views"].from, Value::Null);

        let restored = unwrap_outcome(articles.restore_version(&cx, json!(1), 1).await);
        assert_eq!(restored["title"], json!("Draft"));
        assert_eq!(restored["views"], Value::Null);

        let versions = unwrap_outcome(articles.get_versions(&cx, json!(1)).await);
        assert_eq!(versions.len(), 3);
        assert!(versions.iter().all(|v| v.snapshot.is_none()));
        let same = unwrap_outcome(articles.compare_versions(&cx, json!(1), 1, 3).await);
        assert!(same.is_empty());
    });
}

#[test]
fn versions_record_actor_and_note() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let articles = engine(
        vec![articles(VersioningConfig::new().ignore("views"))],
        &store,
    )
    .handle("articles")
    .unwrap()
    .with_actor(Actor::new(7))
    .with_note("initial import");

    rt.block_on(async {
        unwrap_outcome(
            articles
                .create(&cx, rec(json!({"title": "Hi", "views": 10})))
                .await,
        );
        let version = unwrap_outcome(articles.get_version(&cx, json!(1), 1).await);
        assert_eq!(version.actor, json!(7));
        assert_eq!(version.note.as_deref(), Some("initial import"));
        let snapshot = version.snapshot.unwrap();
        assert!(!snapshot.contains_key("views"));
        assert!(!version.diff.contains_key("views"));
    });
}

#[test]
fn prune_keeps_newest_versions() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let articles = engine(vec![articles(VersioningConfig::new())], &store)
        .handle("articles")
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(articles.create(&cx, rec(json!({"title": "v1"}))).await);
        for text in ["v2", "v3", "v4"] {
            unwrap_outcome(
                articles
                    .update_by_id(&cx, 1, rec(json!({ "title": text })))
                    .await,
            );
        }
        let removed = unwrap_outcome(articles.prune_versions(&cx, json!(1), 2).await);
        assert_eq!(removed, 2);
        let kept: Vec<u64> = unwrap_outcome(articles.get_versions(&cx, json!(1)).await)
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(kept, vec![3, 4]);
        assert_eq!(unwrap_outcome(articles.prune_versions(&cx, json!(1), 5).await), 0);
    });
}

#[test]
fn pruned_diffs_survive_in_the_oldest_kept_version() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let articles = engine(
        vec![articles(VersioningConfig::new().mode(SnapshotMode::Diff))],
        &store,
    )
    .handle("articles")
    .unwrap();

    rt.block_on(async {
        unwrap_outcome(
            articles
                .create(&cx, rec(json!({"title": "t1", "body": "keep me"})))
                .await,
        );
        for text in ["t2", "t3"] {
            unwrap_outcome(
                articles
                    .update_by_id(&cx, 1, rec(json!({ "title": text })))
                    .await,
            );
        }
        assert_eq!(unwrap_outcome(articles.prune_versions(&cx, json!(1), 2).await), 1);
        let base = unwrap_outcome(articles.get_version(&cx, json!(1), 2).await);
        assert_eq!(
            base.snapshot,
            Some(rec(json!({"title": "t2", "body": "keep me"})))
        );

        let restored = unwrap_outcome(articles.restore_version(&cx, json!(1), 2).await);
        assert_eq!(restored["title"], json!("t2"));
        assert_eq!(restored["body"], json!("keep me"));

        // Pruning everything still keeps the newest version.
        assert_eq!(unwrap_outcome(articles.prune_versions(&cx, json!(1), 0).await), 2);
        unwrap_outcome(
            articles
                .update_by_id(&cx, 1, rec(json!({"title": "t5"})))
                .await,
        );
        let numbers: Vec<u64> = unwrap_outcome(articles.get_versions(&cx, json!(1)).await)
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, vec![4, 5]);

        let diff = unwrap_outcome(articles.compare_versions(&cx, json!(1), 4, 5).await);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["title"]);
        let article = unwrap_outcome(articles.find_by_id(&cx, 1).await);
        assert_eq!(article["body"], json!("keep me"));
    });
}

#[test]
fn version_operations_need_the_plugin() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let plain = CollectionDeclaration::builder("notes")
        .field("text", FieldDeclaration::text())
        .build();
    let notes = engine(vec![plain], &store).handle("notes").unwrap();

    rt.block_on(async {
        let err = unwrap_err(notes.get_versions(&cx, json!(1)).await);
        assert!(matches!(err, Error::UnknownOperation { ref operation, .. } if operation == "get_versions"));
    });
    assert!(notes.cache_stats().is_err());
}

fn cached_posts(config: CacheConfig) -> CollectionDeclaration {
    CollectionDeclaration::builder("posts")
        .field("title", FieldDeclaration::text())
        .plugin(cache(config))
        .build()
}

#[test]
fn cache_serves_repeated_reads() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store.seed("posts", vec![rec(json!({"id": 1, "title": "A"}))]);
    let posts = engine(vec![cached_posts(CacheConfig::new())], &store)
        .handle("posts")
        .unwrap();

    rt.block_on(async {
        let first = unwrap_outcome(posts.find_many(&cx, FindOptions::new()).await);
        let reads = store.read_calls();
        let second = unwrap_outcome(posts.find_many(&cx, FindOptions::new()).await);
        assert_eq!(first, second);
        assert_eq!(store.read_calls(), reads);
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 1);
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 1);

        let stats = posts.cache_stats().unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);

        unwrap_outcome(posts.create(&cx, rec(json!({"title": "B"}))).await);
        let after = unwrap_outcome(posts.find_many(&cx, FindOptions::new()).await);
        assert_eq!(after.len(), 2);
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 2);
    });
}

#[test]
fn cache_invalidates_updated_records() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store.seed(
        "posts",
        vec![
            rec(json!({"id": 1, "title": "A"})),
            rec(json!({"id": 2, "title": "B"})),
        ],
    );
    let posts = engine(
        vec![cached_posts(
            CacheConfig::new().invalidation(InvalidationStrategy::Exact),
        )],
        &store,
    )
    .handle("posts")
    .unwrap();

    rt.block_on(async {
        unwrap_outcome(posts.find_by_id(&cx, 1).await);
        unwrap_outcome(posts.find_by_id(&cx, 2).await);
        unwrap_outcome(posts.update_by_id(&cx, 1, rec(json!({"title": "A2"}))).await);

        let reads = store.read_calls();
        let second = unwrap_outcome(posts.find_by_id(&cx, 2).await);
        assert_eq!(second["title"], json!("B"));
        assert_eq!(store.read_calls(), reads);

        let first = unwrap_outcome(posts.find_by_id(&cx, 1).await);
        assert_eq!(first["title"], json!("A2"));
        assert_eq!(store.read_calls(), reads + 1);

        assert_eq!(posts.invalidate_cache().unwrap(), 2);
    });
}

/// `posts` and `authors` sharing one cache plugin value, hence one backend.
fn shared_cache(config: CacheConfig) -> Vec<CollectionDeclaration> {
    let plugin = cache(config);
    vec![
        CollectionDeclaration::builder("posts")
            .field("title", FieldDeclaration::text())
            .plugin(plugin.clone())
            .build(),
        CollectionDeclaration::builder("authors")
            .field("name", FieldDeclaration::text())
            .plugin(plugin)
            .build(),
    ]
}

fn seed_shared(store: &MemoryStore) {
    store.seed("posts", vec![rec(json!({"id": 1, "title": "A"}))]);
    store.seed("authors", vec![rec(json!({"id": 1, "name": "Ada"}))]);
}

#[test]
fn unique_reads_see_records_created_later() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store.seed("posts", vec![rec(json!({"id": 1, "title": "A"}))]);
    let posts = engine(vec![cached_posts(CacheConfig::new())], &store)
        .handle("posts")
        .unwrap();
    let newest_a = FindOptions::new()
        .filter(Filter::eq("title", "A"))
        .order_by("id", SortDirection::Desc);

    rt.block_on(async {
        let before = unwrap_outcome(posts.find_unique(&cx, newest_a.clone()).await);
        assert_eq!(before["id"], json!(1));
        unwrap_outcome(posts.create(&cx, rec(json!({"title": "A"}))).await);
        let after = unwrap_outcome(posts.find_unique(&cx, newest_a.clone()).await);
        assert_eq!(after["id"], json!(2));
    });
}

#[test]
fn equivalent_filters_share_an_entry() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_shared(&store);
    let posts = engine(shared_cache(CacheConfig::new()), &store)
        .handle("posts")
        .unwrap();
    let a = Filter::eq("title", "A");
    let b = Filter::is_not_null("title");

    rt.block_on(async {
        let first = unwrap_outcome(
            posts
                .find_many(&cx, FindOptions::new().filter(a.clone().and(b.clone())))
                .await,
        );
        let reads = store.read_calls();
        let second = unwrap_outcome(posts.find_many(&cx, FindOptions::new().filter(b.and(a))).await);
        assert_eq!(first, second);
        assert_eq!(store.read_calls(), reads);
    });
}

#[test]
fn pattern_invalidation_spares_other_collections() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_shared(&store);
    let engine = engine(
        shared_cache(CacheConfig::new().invalidation(InvalidationStrategy::Pattern)),
        &store,
    );
    let posts = engine.handle("posts").unwrap();
    let authors = engine.handle("authors").unwrap();

    rt.block_on(async {
        unwrap_outcome(posts.find_by_id(&cx, 1).await);
        unwrap_outcome(posts.count(&cx, FindOptions::new()).await);
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        unwrap_outcome(posts.update_by_id(&cx, 1, rec(json!({"title": "B"}))).await);

        let reads = store.read_calls();
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        assert_eq!(store.read_calls(), reads);
        assert_eq!(unwrap_outcome(posts.find_by_id(&cx, 1).await)["title"], json!("B"));
        unwrap_outcome(posts.count(&cx, FindOptions::new()).await);
        assert_eq!(store.read_calls(), reads + 2);
    });
}

#[test]
fn all_invalidation_clears_every_collection() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_shared(&store);
    let engine = engine(
        shared_cache(CacheConfig::new().invalidation(InvalidationStrategy::All)),
        &store,
    );
    let posts = engine.handle("posts").unwrap();
    let authors = engine.handle("authors").unwrap();

    rt.block_on(async {
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        unwrap_outcome(posts.find_many(&cx, FindOptions::new()).await);
        unwrap_outcome(posts.create(&cx, rec(json!({"title": "B"}))).await);

        let reads = store.read_calls();
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        assert_eq!(store.read_calls(), reads + 1);
    });
    assert_eq!(posts.cache_stats().unwrap().entries, 1);
}

#[test]
fn writes_evict_related_collections() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_shared(&store);
    let engine = engine(shared_cache(CacheConfig::new().related("authors")), &store);
    let posts = engine.handle("posts").unwrap();
    let authors = engine.handle("authors").unwrap();

    rt.block_on(async {
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        unwrap_outcome(authors.find_by_id(&cx, 1).await);
        unwrap_outcome(posts.update_by_id(&cx, 1, rec(json!({"title": "B"}))).await);

        let reads = store.read_calls();
        unwrap_outcome(authors.find_many(&cx, FindOptions::new()).await);
        unwrap_outcome(authors.find_by_id(&cx, 1).await);
        assert_eq!(store.read_calls(), reads + 2);
    });
}

#[test]
fn writes_evict_caller_tags() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_shared(&store);
    let engine = engine(shared_cache(CacheConfig::new()), &store);
    let posts = engine.handle("posts").unwrap();
    let authors = engine.handle("authors").unwrap();
    let tagged = || OperationRequest::find_many(FindOptions::new()).tag("feed");

    rt.block_on(async {
        unwrap_outcome(authors.execute(&cx, tagged()).await);
        unwrap_outcome(authors.find_by_id(&cx, 1).await);
        unwrap_outcome(
            posts
                .execute(
                    &cx,
                    OperationRequest::create(rec(json!({"title": "B"}))).tag("feed"),
                )
                .await,
        );

        let reads = store.read_calls();
        unwrap_outcome(authors.find_by_id(&cx, 1).await);
        assert_eq!(store.read_calls(), reads);
        unwrap_outcome(authors.execute(&cx, tagged()).await);
        assert_eq!(store.read_calls(), reads + 1);
    });
}

fn blog(post_cascade: Vec<CascadeRule>, comments_soft: bool) -> Vec<CollectionDeclaration> {
    let mut config = SoftDeleteConfig::new();
    for rule in post_cascade {
        config = config.cascade(rule);
    }
    let posts = CollectionDeclaration::builder("posts")
        .field("title", FieldDeclaration::text())
        .plugin(soft_delete(config))
        .build();
    let mut comments = CollectionDeclaration::builder("comments")
        .field("text", FieldDeclaration::text())
        .field("post", FieldDeclaration::relation("posts"));
    if comments_soft {
        comments = comments.plugin(soft_delete(SoftDeleteConfig::new()));
    }
    vec![posts, comments.build()]
}

fn seed_blog(store: &MemoryStore) {
    store.seed(
        "posts",
        vec![
            rec(json!({"id": 1, "title": "Kept"})),
            rec(json!({"id": 2, "title": "Gone"})),
        ],
    );
    store.seed(
        "comments",
        vec![
            rec(json!({"id": 1, "text": "a", "post": 2})),
            rec(json!({"id": 2, "text": "b", "post": 2})),
            rec(json!({"id": 3, "text": "c", "post": 1})),
        ],
    );
}

#[test]
fn soft_delete_hides_and_restores() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_blog(&store);
    let engine = engine(blog(vec![CascadeRule::soft_delete("comments")], true), &store);
    let posts = engine.handle("posts").unwrap().with_actor(Actor::new("editor"));
    let comments = engine.handle("comments").unwrap();

    rt.block_on(async {
        let deleted = unwrap_outcome(posts.delete(&cx, Filter::id(2)).await);
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0]["deleted_at"].is_string());
        assert_eq!(deleted[0]["deleted_by"], json!("editor"));

        let visible = unwrap_outcome(posts.find_many(&cx, FindOptions::new()).await);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0]["title"], json!("Kept"));
        assert!(matches!(
            unwrap_err(posts.find_by_id(&cx, 2).await),
            Error::NotFound { .. }
        ));
        let all = unwrap_outcome(
            posts
                .find_many(&cx, FindOptions::new().include_deleted(true))
                .await,
        );
        assert_eq!(all.len(), 2);
        let gone = unwrap_outcome(posts.find_deleted(&cx, FindOptions::new()).await);
        assert_eq!(gone.len(), 1);

        assert_eq!(unwrap_outcome(comments.count(&cx, FindOptions::new()).await), 1);
        assert_eq!(store.records("comments").len(), 3);

        let restored = unwrap_outcome(posts.restore(&cx, Filter::id(2)).await);
        assert_eq!(restored[0]["deleted_at"], Value::Null);
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 2);

        unwrap_outcome(posts.delete_permanently(&cx, Filter::id(2)).await);
    });
    assert_eq!(store.records("posts").len(), 1);
}

#[test]
fn restrict_blocks_delete() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_blog(&store);
    let posts = engine(blog(vec![CascadeRule::restrict("comments")], false), &store)
        .handle("posts")
        .unwrap();

    rt.block_on(async {
        let err = unwrap_err(posts.delete(&cx, Filter::id(2)).await);
        assert!(matches!(
            err,
            Error::Restricted { ref related, count: 2, .. } if related == "comments"
        ));
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 2);
    });
    assert_eq!(store.rollbacks(), 1);
}

#[test]
fn nullify_clears_references() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_blog(&store);
    let posts = engine(blog(vec![CascadeRule::nullify("comments")], false), &store)
        .handle("posts")
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(posts.delete(&cx, Filter::id(2)).await);
    });
    let orphans: Vec<Record> = store
        .records("comments")
        .into_iter()
        .filter(|c| c["post"].is_null())
        .collect();
    assert_eq!(orphans.len(), 2);
}

#[test]
fn soft_cascade_requires_soft_delete_on_child() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    seed_blog(&store);
    let posts = engine(blog(vec![CascadeRule::soft_delete("comments")], false), &store)
        .handle("posts")
        .unwrap();

    rt.block_on(async {
        let err = unwrap_err(posts.delete(&cx, Filter::id(2)).await);
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidDeclaration { .. })
        ));
    });
    assert!(
        store
            .records("posts")
            .iter()
            .all(|p| p.get("deleted_at").is_none_or(Value::is_null))
    );
}

#[test]
fn seo_fills_metadata_from_content() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let pages = CollectionDeclaration::builder("pages")
        .field("title", FieldDeclaration::text())
        .field("body", FieldDeclaration::text())
        .build();
    let tags = CollectionDeclaration::builder("tags")
        .field("name", FieldDeclaration::text())
        .build();
    let schema = SchemaResolver::default()
        .plugin(seo(SeoConfig::new().description_field("body").limits(10, 12)))
        .resolve(vec![pages, tags])
        .unwrap();
    let engine = Arc::new(Engine::new(Arc::new(schema), Arc::new(store.clone())));
    let pages = engine.handle("pages").unwrap();
    assert!(!engine.handle("tags").unwrap().collection().has_field("meta_title"));

    rt.block_on(async {
        let page = unwrap_outcome(
            pages
                .create(
                    &cx,
                    rec(json!({"title": "Rust in production", "body": "Lessons from five years"})),
                )
                .await,
        );
        assert_eq!(page["meta_title"], json!("Rust in pr"));
        assert_eq!(page["meta_description"], json!("Lessons from"));

        let custom = unwrap_outcome(
            pages
                .create(&cx, rec(json!({"title": "Home", "meta_title": "Welcome"})))
                .await,
        );
        assert_eq!(custom["meta_title"], json!("Welcome"));

        let err = unwrap_err(
            pages
                .create(&cx, rec(json!({"title": "x", "meta_title": "y".repeat(11)})))
                .await,
        );
        assert!(matches!(err, Error::Validation(_)));
    });
}
