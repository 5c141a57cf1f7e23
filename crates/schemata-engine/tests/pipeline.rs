//! Read and write pipelines against the in-memory store.

use std::sync::{Arc, Mutex, PoisonError};

use asupersync::runtime::RuntimeBuilder;
use schemata_core::{
    Actor, Cx, Error, FieldDeclaration, Filter, FindOptions, HookArgs, HookBinding, HookSignal,
    HookStage, LocalizedText, OperationKind, Outcome, Record, SortDirection, StaticCatalog, Value,
    json,
};
use schemata_engine::{CollectionHandle, Engine, EngineConfig};
use schemata_memory::MemoryStore;
use schemata_schema::{AccessRule, CollectionDeclaration, SchemaResolver};

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

fn users() -> CollectionDeclaration {
    CollectionDeclaration::builder("users")
        .field("name", FieldDeclaration::text().required())
        .field("email", FieldDeclaration::email().unique())
        .field("posts", FieldDeclaration::reverse_relation("posts", "author"))
        .build()
}

fn posts() -> CollectionDeclaration {
    CollectionDeclaration::builder("posts")
        .field(
            "title",
            FieldDeclaration::text().option("max_length", 20).required(),
        )
        .field(
            "status",
            FieldDeclaration::select(["draft", "published"]).default_value("draft"),
        )
        .field("author", FieldDeclaration::relation("users"))
        .field("views", FieldDeclaration::integer().option("min", 0))
        .field(
            "headline",
            FieldDeclaration::computed("text", ["title", "status"], |r| {
                json!(format!(
                    "[{}] {}",
                    r.get("status").and_then(Value::as_str).unwrap_or("?"),
                    r.get("title").and_then(Value::as_str).unwrap_or("")
                ))
            }),
        )
        .build()
}

#[test]
fn create_applies_defaults_and_computes_fields() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let posts = engine(vec![users(), posts()], &store).handle("posts").unwrap();

    rt.block_on(async {
        let created = unwrap_outcome(posts.create(&cx, rec(json!({"title": "Hello"}))).await);
        assert_eq!(created["id"], json!(1));
        assert_eq!(created["status"], json!("draft"));
        assert_eq!(created["headline"], json!("[draft] Hello"));

        let stored = store.records("posts");
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].contains_key("headline"));

        let found = unwrap_outcome(
            posts
                .find_many(&cx, FindOptions::new().select(["headline"]))
                .await,
        );
        assert_eq!(found, vec![rec(json!({"id": 1, "headline": "[draft] Hello"}))]);
    });
    assert_eq!(store.commits(), 1);
}

#[test]
fn validation_failures_are_field_attributed() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let posts = engine(vec![users(), posts()], &store).handle("posts").unwrap();

    rt.block_on(async {
        let err = unwrap_err(
            posts
                .create(
                    &cx,
                    rec(json!({"title": "x".repeat(21), "status": "archived", "views": -1})),
                )
                .await,
        );
        let Error::Validation(validation) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert_eq!(validation.collection, "posts");
        assert_eq!(validation.messages_for("title").len(), 1);
        assert_eq!(validation.messages_for("status").len(), 1);
        assert_eq!(validation.messages_for("views").len(), 1);

        let missing = unwrap_err(posts.create(&cx, rec(json!({"status": "draft"}))).await);
        assert!(
            matches!(missing, Error::Validation(ref v) if v.messages_for("title") == ["is required"])
        );

        let unknown = unwrap_err(posts.create(&cx, rec(json!({"title": "a", "color": "red"}))).await);
        assert!(matches!(unknown, Error::Validation(ref v) if !v.messages_for("color").is_empty()));

        let computed = unwrap_err(
            posts
                .create(&cx, rec(json!({"title": "a", "headline": "b"})))
                .await,
        );
        assert!(matches!(computed, Error::Validation(_)));
    });
    assert!(store.records("posts").is_empty());
}

#[test]
fn unique_fields_are_checked_in_the_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let users = engine(vec![users(), posts()], &store).handle("users").unwrap();

    rt.block_on(async {
        unwrap_outcome(
            users
                .create(&cx, rec(json!({"name": "Ada", "email": "ada@example.com"})))
                .await,
        );
        let err = unwrap_err(
            users
                .create(&cx, rec(json!({"name": "Eve", "email": "ada@example.com"})))
                .await,
        );
        assert!(matches!(err, Error::Validation(ref v) if v.messages_for("email") == ["must be unique"]));

        // Re-saving the same value on the same record is fine.
        let updated = unwrap_outcome(
            users
                .update_by_id(&cx, 1, rec(json!({"email": "ada@example.com"})))
                .await,
        );
        assert_eq!(updated["name"], json!("Ada"));
    });
    assert_eq!(store.rollbacks(), 1);
}

fn trace(
    name: &'static str,
    seen: &Arc<Mutex<Vec<String>>>,
) -> impl Fn(&mut HookArgs) -> schemata_core::Result<HookSignal> + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |args| {
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{name}:{}", args.operation));
        Ok(HookSignal::Continue)
    }
}

#[test]
fn hooks_run_in_order_and_see_earlier_mutations() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let notes = CollectionDeclaration::builder("notes")
        .field("body", FieldDeclaration::text().required())
        .hook(HookBinding::before_create("trim", |args| {
            if let Some(Value::String(body)) = args.data.get("body") {
                let trimmed = body.trim().to_string();
                args.set("body", trimmed);
            }
            Ok(HookSignal::Continue)
        }))
        .hook(HookBinding::before_create("shout", |args| {
            let body = args.get("body").and_then(Value::as_str).unwrap_or("").to_uppercase();
            args.set("body", body);
            Ok(HookSignal::Continue)
        }))
        .hook(HookBinding::new(
            "validate",
            HookStage::Validate,
            &[],
            trace("validate", &seen),
        ))
        .hook(HookBinding::new(
            "before_database",
            HookStage::BeforeDatabase,
            &[],
            trace("before_database", &seen),
        ))
        .hook(HookBinding::new(
            "after",
            HookStage::AfterOperation,
            &[],
            trace("after", &seen),
        ))
        .hook(HookBinding::new(
            "after_read",
            HookStage::AfterRead,
            &[],
            trace("after_read", &seen),
        ))
        .build();
    let notes = engine(vec![notes], &store).handle("notes").unwrap();

    rt.block_on(async {
        let created = unwrap_outcome(notes.create(&cx, rec(json!({"body": "  hi  "}))).await);
        assert_eq!(created["body"], json!("HI"));
        unwrap_outcome(notes.find_many(&cx, FindOptions::new()).await);
    });
    let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert_eq!(
        seen,
        [
            "validate:create",
            "before_database:create",
            "after:create",
            "after_read:find_many"
        ]
    );
}

#[test]
fn skip_signal_turns_a_write_into_a_no_op() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store.seed("flags", vec![rec(json!({"name": "beta", "locked": true}))]);
    let flags = CollectionDeclaration::builder("flags")
        .field("name", FieldDeclaration::text())
        .field("locked", FieldDeclaration::boolean())
        .hook(HookBinding::before_update("locked", |args| {
            if args.previous.iter().any(|p| p.get("locked") == Some(&json!(true))) {
                return Ok(HookSignal::Skip);
            }
            Ok(HookSignal::Continue)
        }))
        .build();
    let flags = engine(vec![flags], &store).handle("flags").unwrap();

    rt.block_on(async {
        let result = unwrap_outcome(
            flags
                .update(&cx, Filter::eq("name", "beta"), rec(json!({"name": "gamma"})))
                .await,
        );
        assert_eq!(result[0]["name"], json!("beta"));
    });
    assert_eq!(store.records("flags")[0]["name"], json!("beta"));
    assert_eq!(store.write_calls(), 0);
}

#[test]
fn hook_failure_is_attributed_and_rolls_back() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let audited = CollectionDeclaration::builder("audited")
        .field("value", FieldDeclaration::integer())
        .hook(HookBinding::after_create("audit", |_| {
            Err(Error::custom("audit sink unavailable"))
        }))
        .build();
    let audited = engine(vec![audited], &store).handle("audited").unwrap();

    rt.block_on(async {
        let err = unwrap_err(audited.create(&cx, rec(json!({"value": 1}))).await);
        let Error::Hook(hook) = err else {
            panic!("expected a hook error, got {err:?}");
        };
        assert_eq!(hook.stage, HookStage::AfterOperation);
        assert_eq!(hook.hook, "audit");
        assert_eq!(hook.collection, "audited");
        assert!(hook.to_string().contains("audit sink unavailable"));
    });
    assert!(store.records("audited").is_empty());
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.commits(), 0);
}

#[test]
fn side_effect_errors_are_tolerated_unless_strict() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let collection = || {
        CollectionDeclaration::builder("events")
            .field("kind", FieldDeclaration::text())
            .hook(HookBinding::after_create("warm_cache", |_| {
                Err(Error::Cache("backend down".into()))
            }))
            .build()
    };

    let relaxed_store = MemoryStore::new();
    let relaxed = engine(vec![collection()], &relaxed_store).handle("events").unwrap();
    let strict_store = MemoryStore::new();
    let schema = SchemaResolver::default().resolve(vec![collection()]).unwrap();
    let strict = Arc::new(
        Engine::new(Arc::new(schema), Arc::new(strict_store.clone()))
            .with_config(EngineConfig::new().strict(true)),
    )
    .handle("events")
    .unwrap();

    rt.block_on(async {
        unwrap_outcome(relaxed.create(&cx, rec(json!({"kind": "signup"}))).await);
        let err = unwrap_err(strict.create(&cx, rec(json!({"kind": "signup"}))).await);
        assert!(matches!(err, Error::Hook(_)));
    });
    assert_eq!(relaxed_store.records("events").len(), 1);
    assert!(strict_store.records("events").is_empty());
}

#[test]
fn access_rules_are_enforced() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let secrets = CollectionDeclaration::builder("secrets")
        .field("value", FieldDeclaration::text())
        .access(OperationKind::FindMany, AccessRule::Authenticated)
        .write_access(AccessRule::Roles(vec!["admin".into()]))
        .build();
    let secrets = engine(vec![secrets], &store).handle("secrets").unwrap();

    rt.block_on(async {
        let err = unwrap_err(secrets.find_many(&cx, FindOptions::new()).await);
        assert!(matches!(
            err,
            Error::Forbidden { operation: OperationKind::FindMany, .. }
        ));

        let editor = secrets.clone().with_actor(Actor::new(1).with_role("editor"));
        unwrap_outcome(editor.find_many(&cx, FindOptions::new()).await);
        let err = unwrap_err(editor.create(&cx, rec(json!({"value": "x"}))).await);
        assert!(matches!(err, Error::Forbidden { .. }));

        let admin = secrets.with_actor(Actor::new(2).with_role("admin"));
        unwrap_outcome(admin.create(&cx, rec(json!({"value": "x"}))).await);
    });
}

#[test]
fn includes_resolve_forward_and_reverse_relations() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store.seed(
        "users",
        vec![
            rec(json!({"id": 1, "name": "Ada"})),
            rec(json!({"id": 2, "name": "Grace"})),
        ],
    );
    store.seed(
        "posts",
        vec![
            rec(json!({"id": 10, "title": "One", "status": "draft", "author": 1})),
            rec(json!({"id": 11, "title": "Two", "status": "draft", "author": 1})),
            rec(json!({"id": 12, "title": "Three", "status": "draft", "author": 2})),
        ],
    );
    let engine = engine(vec![users(), posts()], &store);
    let posts = engine.handle("posts").unwrap();
    let users = engine.handle("users").unwrap();

    rt.block_on(async {
        let post = unwrap_outcome(
            posts
                .find_unique(&cx, FindOptions::new().filter(Filter::id(12)).include("author"))
                .await,
        );
        assert_eq!(post["author"]["name"], json!("Grace"));

        let ada = unwrap_outcome(
            users
                .find_unique(&cx, FindOptions::new().filter(Filter::id(1)).include("posts"))
                .await,
        );
        let titles: Vec<&str> = ada["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["One", "Two"]);

        let err = unwrap_err(
            posts
                .find_many(&cx, FindOptions::new().include("title"))
                .await,
        );
        assert!(matches!(err, Error::Validation(_)));
    });
}

#[test]
fn localized_fields_are_stored_per_locale() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let pages = CollectionDeclaration::builder("pages")
        .field("title", FieldDeclaration::text().localized())
        .build();
    let pages = engine(vec![pages], &store).handle("pages").unwrap();

    rt.block_on(async {
        unwrap_outcome(pages.create(&cx, rec(json!({"title": "Welcome"}))).await);
        let german = pages.clone().with_locale("de");
        let updated = unwrap_outcome(
            german
                .update_by_id(&cx, 1, rec(json!({"title": "Willkommen"})))
                .await,
        );
        assert_eq!(updated["title"], json!("Willkommen"));

        let english = unwrap_outcome(pages.find_by_id(&cx, 1).await);
        assert_eq!(english["title"], json!("Welcome"));
        let french = unwrap_outcome(
            pages
                .find_unique(&cx, FindOptions::new().filter(Filter::id(1)).locale("fr"))
                .await,
        );
        assert_eq!(french["title"], json!("Welcome"));

        let err = unwrap_err(
            pages
                .find_many(&cx, FindOptions::new().filter(Filter::eq("title", "Welcome")))
                .await,
        );
        assert!(matches!(err, Error::Validation(_)));
    });
    assert_eq!(
        store.records("pages")[0]["title"],
        json!({"en": "Welcome", "de": "Willkommen"})
    );
}

#[test]
fn missing_targets_are_not_found() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let posts = engine(vec![users(), posts()], &store).handle("posts").unwrap();

    rt.block_on(async {
        let err = unwrap_err(posts.find_by_id(&cx, 99).await);
        assert!(matches!(err, Error::NotFound { ref collection, .. } if collection == "posts"));
        let err = unwrap_err(
            posts
                .update(&cx, Filter::eq("title", "nope"), rec(json!({"views": 1})))
                .await,
        );
        assert!(matches!(err, Error::NotFound { .. }));
        let err = unwrap_err(posts.delete(&cx, Filter::id(99)).await);
        assert!(matches!(err, Error::NotFound { .. }));
    });
}

#[test]
fn reads_order_and_window() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let posts = engine(vec![users(), posts()], &store).handle("posts").unwrap();

    rt.block_on(async {
        for (title, views) in [("a", 5), ("b", 1), ("c", 9)] {
            unwrap_outcome(
                posts
                    .create(&cx, rec(json!({"title": title, "views": views})))
                    .await,
            );
        }
        let top = unwrap_outcome(
            posts
                .find_many(
                    &cx,
                    FindOptions::new()
                        .order_by("views", SortDirection::Desc)
                        .limit(2),
                )
                .await,
        );
        let titles: Vec<_> = top.iter().map(|p| p["title"].clone()).collect();
        assert_eq!(titles, [json!("c"), json!("a")]);

        let count = unwrap_outcome(
            posts
                .count(&cx, FindOptions::new().filter(Filter::gt("views", 1)))
                .await,
        );
        assert_eq!(count, 2);

        let deleted = unwrap_outcome(posts.delete(&cx, Filter::lt("views", 5)).await);
        assert_eq!(deleted.len(), 1);
        assert_eq!(unwrap_outcome(posts.count(&cx, FindOptions::new()).await), 2);
    });
}

#[test]
fn labels_resolve_through_the_catalog() {
    let store = MemoryStore::new();
    let catalog = StaticCatalog::new("en")
        .insert("posts.label", "en", "Posts")
        .insert("posts.label", "de", "Beiträge");
    let schema = SchemaResolver::default()
        .resolve(vec![
            CollectionDeclaration::builder("posts")
                .label(LocalizedText::key("posts.label"))
                .field(
                    "title",
                    FieldDeclaration::text().label(LocalizedText::new().with("en", "Title")),
                )
                .build(),
        ])
        .unwrap();
    let engine = Arc::new(
        Engine::new(Arc::new(schema), Arc::new(store)).with_catalog(Arc::new(catalog)),
    );
    let posts: CollectionHandle = engine.handle("posts").unwrap();

    assert_eq!(posts.label(Some("de")).as_deref(), Some("Beiträge"));
    assert_eq!(posts.label(Some("fr")).as_deref(), Some("Posts"));
    assert_eq!(
        posts.clone().with_locale("de").field_label("title", None).as_deref(),
        Some("Title")
    );
}

#[test]
fn unknown_collection_is_reported() {
    let store = MemoryStore::new();
    let engine = engine(vec![users(), posts()], &store);
    let err = engine.handle("comments").unwrap_err();
    assert_eq!(err.to_string(), "collection 'comments' does not exist");
}
