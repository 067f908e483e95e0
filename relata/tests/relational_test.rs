use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relata::common::Value;
use relata::doc;
use relata::errors::{ErrorKind, RelataResult};
use relata::model::{
    CollectionKind, EntityHooks, EntityModel, Junction, ModelRegistry, PropertyMeta, PropertyType,
    Record, RelationDef, UniquePolicy,
};
use relata::relational::{
    Condition, Conditions, MockSqlDriver, QueryOptions, SqlRepository, UnlinkTarget,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn registry() -> ModelRegistry {
    let registry = ModelRegistry::new();
    registry.register(
        EntityModel::builder("user")
            .auto_id()
            .table("users")
            .property(PropertyMeta::new("name", PropertyType::Str))
            .build()
            .unwrap(),
    );
    registry.register(
        EntityModel::builder("comment")
            .auto_id()
            .table("comments")
            .property(PropertyMeta::new("post_id", PropertyType::Int))
            .property(PropertyMeta::new("body", PropertyType::Str))
            .build()
            .unwrap(),
    );
    registry.register(
        EntityModel::builder("tag")
            .auto_id()
            .table("tags")
            .property(PropertyMeta::new("name", PropertyType::Str))
            .build()
            .unwrap(),
    );
    registry.register(
        EntityModel::builder("post")
            .auto_id()
            .table("posts")
            .property(PropertyMeta::new("title", PropertyType::Str).required())
            .property(PropertyMeta::new("views", PropertyType::Int))
            .property(PropertyMeta::new("author_id", PropertyType::Int))
            .property(PropertyMeta::new("comment_count", PropertyType::Int).transient())
            .property(
                PropertyMeta::new("author", PropertyType::Entity("user".into())).relation(
                    RelationDef::new("user", "author_id", "id", Junction::Single),
                ),
            )
            .property(
                PropertyMeta::new("comments", PropertyType::Entity("comment".into()))
                    .collection(CollectionKind::List)
                    .single_alias("comment")
                    .relation(RelationDef::new("comment", "id", "post_id", Junction::None)),
            )
            .property(
                PropertyMeta::new("tags", PropertyType::Entity("tag".into()))
                    .collection(CollectionKind::List)
                    .single_alias("tag")
                    .unique(UniquePolicy::ByKey("id".into()))
                    .relation(RelationDef::new(
                        "tag",
                        "post_id",
                        "tag_id",
                        Junction::Table("post_tags".into()),
                    )),
            )
            .build()
            .unwrap(),
    );
    registry
}

fn post_repository(driver: Arc<MockSqlDriver>) -> SqlRepository {
    let registry = registry();
    let model = registry.get("post").unwrap();
    SqlRepository::new(model, registry, driver)
}

#[test]
fn loaded_record_round_trips_property_values() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "hello", "views" => 5 }]);
    let repository = post_repository(driver.clone());

    let records = repository
        .load(
            &Conditions::from(Condition::eq("id", 1)),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records["1"];
    assert!(!record.is_new());
    assert_eq!(record.get("title").unwrap(), Value::from("hello"));
    assert_eq!(record.get("views").unwrap(), Value::I64(5));

    let (sql, params) = &driver.statements()[0];
    assert_eq!(
        sql,
        "SELECT id, title, views, author_id FROM posts WHERE id = ?"
    );
    assert_eq!(params, &vec![Value::I64(1)]);
}

#[test]
fn saving_a_new_record_inserts_and_adopts_the_generated_id() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.set_last_insert_id(42);
    let repository = post_repository(driver.clone());

    let mut post = repository.create(&doc! { "title" => "hello" }, true).unwrap();
    assert!(post.is_new());
    assert!(repository.save(&mut post).unwrap());

    assert!(!post.is_new());
    assert_eq!(post.identifier_value(), Value::I64(42));
    let (sql, params) = &driver.statements()[0];
    assert_eq!(sql, "INSERT INTO posts (title) VALUES (?)");
    assert_eq!(params, &vec![Value::from("hello")]);
}

#[test]
fn natural_key_models_never_adopt_last_insert_id() {
    let registry = ModelRegistry::new();
    let model = registry.register(
        EntityModel::builder("setting")
            .table("settings")
            .identifier("key")
            .property(PropertyMeta::new("key", PropertyType::Str))
            .property(PropertyMeta::new("value", PropertyType::Str))
            .build()
            .unwrap(),
    );
    let driver = Arc::new(MockSqlDriver::new());
    driver.set_last_insert_id(42);
    let repository = SqlRepository::new(model, registry, driver.clone());

    let mut setting = repository.create(&doc! { "value" => "on" }, true).unwrap();
    assert!(repository.save(&mut setting).unwrap());
    // the connection-level insert id belongs to some other statement
    assert!(setting.identifier_value().is_null());
    assert_eq!(driver.statements()[0].0, "INSERT INTO settings (value) VALUES (?)");
}

#[test]
fn saving_a_clean_record_issues_no_write() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "hello", "views" => 5 }]);
    let repository = post_repository(driver.clone());

    let mut post = repository.load_by_id(1).unwrap().unwrap();
    assert!(repository.save(&mut post).unwrap());
    // only the initial SELECT went out
    assert_eq!(driver.statements().len(), 1);

    post.set("title", "changed").unwrap();
    assert!(repository.save(&mut post).unwrap());
    let (sql, params) = &driver.statements()[1];
    assert_eq!(sql, "UPDATE posts SET title = ? WHERE id = ?");
    assert_eq!(params, &vec![Value::from("changed"), Value::I64(1)]);

    // saving again without changes is idempotent
    assert!(repository.save(&mut post).unwrap());
    assert_eq!(driver.statements().len(), 2);
}

#[test]
fn clearing_a_column_updates_it_to_null() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "hello", "views" => 5 }]);
    let repository = post_repository(driver.clone());

    let mut post = repository.load_by_id(1).unwrap().unwrap();
    post.clear("views").unwrap();
    repository.save(&mut post).unwrap();

    let (sql, params) = &driver.statements()[1];
    assert_eq!(sql, "UPDATE posts SET views = ? WHERE id = ?");
    assert_eq!(params, &vec![Value::Null, Value::I64(1)]);
}

#[test]
fn missing_required_property_blocks_the_save() {
    let driver = Arc::new(MockSqlDriver::new());
    let repository = post_repository(driver.clone());

    let mut post = repository.create(&doc! { "views" => 3 }, true).unwrap();
    let err = repository.save(&mut post).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::RequiredProperty);
    assert!(driver.statements().is_empty());
}

#[test]
fn removing_a_record_clears_its_junction_rows_in_one_transaction() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 7, "title" => "bye" }]);
    let repository = post_repository(driver.clone());

    let mut post = repository.load_by_id(7).unwrap().unwrap();
    assert!(repository.remove(&mut post).unwrap());
    assert!(post.is_new());

    let statements = driver.statements();
    assert_eq!(statements[1].0, "BEGIN");
    assert_eq!(statements[2].0, "DELETE FROM post_tags WHERE post_id = ?");
    assert_eq!(statements[2].1, vec![Value::I64(7)]);
    assert_eq!(statements[3].0, "DELETE FROM posts WHERE id = ?");
    assert_eq!(statements[3].1, vec![Value::I64(7)]);
    assert_eq!(statements[4].0, "COMMIT");

    // the record can be saved again as a fresh row
    assert!(repository.save(&mut post).unwrap());
    assert!(statements.len() < driver.statements().len());
}

#[test]
fn failed_delete_rolls_the_transaction_back() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 7, "title" => "bye" }]);
    let repository = post_repository(driver.clone());
    let mut post = repository.load_by_id(7).unwrap().unwrap();

    driver.expect_affected(1);
    driver.expect_error("lock wait timeout");
    let err = repository.remove(&mut post).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Driver);
    assert_eq!(err.message(), "lock wait timeout");
    assert_eq!(driver.statement_texts().last().map(String::as_str), Some("ROLLBACK"));
    // the record still counts as persisted
    assert!(!post.is_new());
}

#[test]
fn link_and_unlink_junction_relations_through_the_alias() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "post" }]);
    let repository = post_repository(driver.clone());
    let mut post = repository.load_by_id(1).unwrap().unwrap();

    let registry = registry();
    let mut tag = Record::from_document(
        registry.get("tag").unwrap(),
        &doc! { "id" => 10, "name" => "rust" },
        false,
    )
    .unwrap();

    repository.link_related(&mut post, "tag", &mut tag).unwrap();
    // the pair is checked for before it is inserted
    let (sql, params) = &driver.statements()[1];
    assert_eq!(
        sql,
        "SELECT COUNT(*) FROM post_tags WHERE post_id = ? AND tag_id = ?"
    );
    assert_eq!(params, &vec![Value::I64(1), Value::I64(10)]);
    let (sql, params) = &driver.statements()[2];
    assert_eq!(sql, "INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)");
    assert_eq!(params, &vec![Value::I64(1), Value::I64(10)]);

    // an already linked pair is not inserted twice
    driver.expect_column(vec![Value::I64(1)]);
    repository.link_related(&mut post, "tag", &mut tag).unwrap();
    assert_eq!(driver.statements().len(), 4);

    repository
        .unlink_related(&mut post, "tag", UnlinkTarget::record(&tag), false)
        .unwrap();
    let (sql, params) = &driver.statements()[4];
    assert_eq!(sql, "DELETE FROM post_tags WHERE post_id = ? AND tag_id = ?");
    assert_eq!(params, &vec![Value::I64(1), Value::I64(10)]);

    repository
        .unlink_related(&mut post, "tags", UnlinkTarget::All, false)
        .unwrap();
    let (sql, params) = &driver.statements()[5];
    assert_eq!(sql, "DELETE FROM post_tags WHERE post_id = ?");
    assert_eq!(params, &vec![Value::I64(1)]);
}

#[test]
fn linking_a_single_relation_updates_the_foreign_key_column() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "post" }]);
    let repository = post_repository(driver.clone());
    let mut post = repository.load_by_id(1).unwrap().unwrap();

    repository
        .link_related_id(&mut post, "author", Value::I64(3))
        .unwrap();
    let (sql, params) = &driver.statements()[1];
    assert_eq!(sql, "UPDATE posts SET author_id = ? WHERE id = ?");
    assert_eq!(params, &vec![Value::I64(3), Value::I64(1)]);
    // the record tracks the new value as clean
    assert_eq!(post.get("author_id").unwrap(), Value::I64(3));
    assert!(post.dirty_columns().is_empty());

    repository
        .unlink_related(&mut post, "author", UnlinkTarget::All, false)
        .unwrap();
    let (sql, params) = &driver.statements()[2];
    assert_eq!(sql, "UPDATE posts SET author_id = ? WHERE id = ?");
    assert_eq!(params, &vec![Value::Null, Value::I64(1)]);
    assert!(!post.has("author_id"));
}

#[test]
fn linking_by_id_requires_a_persisted_record() {
    let driver = Arc::new(MockSqlDriver::new());
    let repository = post_repository(driver.clone());
    let mut post = repository.create(&doc! { "title" => "draft" }, true).unwrap();
    let err = repository
        .link_related_id(&mut post, "author", Value::I64(3))
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    assert!(driver.statements().is_empty());
}

#[test]
fn linking_records_saves_both_sides_first() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.set_last_insert_id(1);
    let repository = post_repository(driver.clone());
    let mut post = repository.create(&doc! { "title" => "draft" }, true).unwrap();

    let registry = registry();
    let mut tag = Record::from_document(
        registry.get("tag").unwrap(),
        &doc! { "name" => "rust" },
        true,
    )
    .unwrap();

    repository.link_related(&mut post, "tag", &mut tag).unwrap();
    assert!(!post.is_new());
    assert!(!tag.is_new());
    let texts = driver.statement_texts();
    assert_eq!(texts[0], "INSERT INTO posts (title) VALUES (?)");
    assert_eq!(texts[1], "INSERT INTO tags (name) VALUES (?)");
    assert_eq!(
        texts.last().map(String::as_str),
        Some("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
    );
}

#[test]
fn per_relation_and_joined_loaders_agree() {
    // per-relation strategy
    let driver_a = Arc::new(MockSqlDriver::new());
    driver_a.expect_rows(vec![
        doc! { "id" => 1, "title" => "one", "views" => 5 },
        doc! { "id" => 2, "title" => "two", "views" => 3 },
    ]);
    driver_a.expect_rows(vec![
        doc! { "_link" => 1, "b_id" => 10, "b_name" => "rust" },
        doc! { "_link" => 1, "b_id" => 20, "b_name" => "db" },
        doc! { "_link" => 2, "b_id" => 10, "b_name" => "rust" },
    ]);
    let repository_a = post_repository(driver_a.clone());
    let result_a = repository_a
        .load_with_relations(&Conditions::new(), &["tags"], &[], &QueryOptions::default())
        .unwrap();

    // joined strategy over the equivalent row fan-out
    let driver_b = Arc::new(MockSqlDriver::new());
    driver_b.expect_rows(vec![
        doc! { "a_id" => 1, "a_title" => "one", "a_views" => 5, "b_id" => 10, "b_name" => "rust" },
        doc! { "a_id" => 1, "a_title" => "one", "a_views" => 5, "b_id" => 20, "b_name" => "db" },
        doc! { "a_id" => 2, "a_title" => "two", "a_views" => 3, "b_id" => 10, "b_name" => "rust" },
    ]);
    let repository_b = post_repository(driver_b.clone());
    let result_b = repository_b
        .load_with_relations_joined(&Conditions::new(), &["tags"], &QueryOptions::default())
        .unwrap();

    assert_eq!(result_a, result_b);
    let post_one = &result_a["1"];
    let tags = post_one.get("tags").unwrap();
    let tags = tags.as_array().unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(
        tags[0].as_record().unwrap().get("name").unwrap(),
        Value::from("rust")
    );
}

#[test]
fn joined_loader_queries_the_id_window_before_paging() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_column(vec![Value::I64(1)]);
    driver.expect_rows(vec![
        doc! { "a_id" => 1, "a_title" => "one", "b_id" => 10, "b_name" => "rust" },
    ]);
    let repository = post_repository(driver.clone());

    let result = repository
        .load_with_relations_joined(
            &Conditions::new(),
            &["tags"],
            &QueryOptions::page(1, 0),
        )
        .unwrap();
    assert_eq!(result.len(), 1);

    let statements = driver.statements();
    assert!(statements[0].0.starts_with("SELECT DISTINCT a.id FROM posts a"));
    assert!(statements[0].0.ends_with("LIMIT 1 OFFSET 0"));
    assert!(statements[1].0.contains("WHERE a.id IN (?)"));
    assert!(!statements[1].0.contains("LIMIT"));
    assert_eq!(statements[1].1, vec![Value::I64(1)]);
}

#[test]
fn single_relations_and_aggregates_resolve_per_relation() {
    let registry = registry();
    // the aggregate target must be declared on the model
    let model = EntityModel::builder("post_stats")
        .table("posts")
        .property(PropertyMeta::new("title", PropertyType::Str))
        .property(PropertyMeta::new("author_id", PropertyType::Int))
        .property(
            PropertyMeta::new("author", PropertyType::Entity("user".into())).relation(
                RelationDef::new("user", "author_id", "id", Junction::Single),
            ),
        )
        .property(PropertyMeta::new("comment_count", PropertyType::Int).transient())
        .build()
        .unwrap();
    let model = registry.register(model);

    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![
        doc! { "id" => 1, "title" => "one", "author_id" => 3 },
        doc! { "id" => 2, "title" => "two" },
    ]);
    driver.expect_rows(vec![doc! { "id" => 3, "name" => "Ada" }]);
    driver.expect_rows(vec![doc! { "post_id" => 1, "_value" => 4 }]);
    let repository = SqlRepository::new(model, registry, driver.clone());

    let result = repository
        .load_with_relations(
            &Conditions::new(),
            &["author"],
            &[relata::relational::Aggregate::new(
                "comment_count",
                "comments",
                "post_id",
                "COUNT(*)",
            )],
            &QueryOptions::default(),
        )
        .unwrap();

    let first = &result["1"];
    let author = first.get("author").unwrap();
    assert_eq!(
        author.as_record().unwrap().get("name").unwrap(),
        Value::from("Ada")
    );
    assert_eq!(first.get("comment_count").unwrap(), Value::I64(4));
    // the second post has no author and no comments
    let second = &result["2"];
    assert!(!second.has("author"));
    assert!(!second.has("comment_count"));

    let aggregate_sql = &driver.statements()[2].0;
    assert_eq!(
        aggregate_sql,
        "SELECT post_id, COUNT(*) _value FROM comments WHERE post_id IN (?, ?) GROUP BY post_id"
    );
}

#[derive(Default)]
struct CountingHooks {
    pre_saves: AtomicUsize,
    post_saves: AtomicUsize,
    pre_removes: AtomicUsize,
    post_removes: AtomicUsize,
    post_loads: AtomicUsize,
    veto_save: bool,
}

impl EntityHooks for CountingHooks {
    fn pre_save(&self, _record: &mut Record, _is_update: bool) -> RelataResult<bool> {
        self.pre_saves.fetch_add(1, Ordering::SeqCst);
        Ok(!self.veto_save)
    }

    fn post_save(&self, _record: &mut Record, _is_update: bool) -> RelataResult<()> {
        self.post_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre_remove(&self, _record: &mut Record) -> RelataResult<bool> {
        self.pre_removes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn post_remove(&self, _record: &mut Record) -> RelataResult<()> {
        self.post_removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_load(&self, _record: &mut Record) -> RelataResult<()> {
        self.post_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn hooks_fire_around_record_writes_but_never_for_raw_bulk_operations() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "one" }]);
    let hooks = Arc::new(CountingHooks::default());
    let repository = post_repository(driver.clone()).with_hooks(hooks.clone());

    let mut post = repository.load_by_id(1).unwrap().unwrap();
    assert_eq!(hooks.post_loads.load(Ordering::SeqCst), 1);

    post.set("views", 9).unwrap();
    repository.save(&mut post).unwrap();
    assert_eq!(hooks.pre_saves.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.post_saves.load(Ordering::SeqCst), 1);

    repository
        .update_by(
            &Conditions::from(Condition::raw("views > 100")),
            &doc! { "views" => 0 },
            true,
        )
        .unwrap();
    repository
        .remove_by(&Conditions::from(Condition::eq("title", "spam")), true)
        .unwrap();
    assert_eq!(hooks.pre_saves.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.post_saves.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.pre_removes.load(Ordering::SeqCst), 0);

    repository.remove(&mut post).unwrap();
    assert_eq!(hooks.pre_removes.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.post_removes.load(Ordering::SeqCst), 1);
}

#[test]
fn checked_bulk_updates_load_and_save_each_record() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![
        doc! { "id" => 1, "title" => "one", "views" => 200 },
        doc! { "id" => 2, "title" => "two", "views" => 300 },
    ]);
    let hooks = Arc::new(CountingHooks::default());
    let registry = registry();
    registry.set_hooks("post", hooks.clone());
    let repository =
        SqlRepository::new(registry.get("post").unwrap(), registry.clone(), driver.clone());

    let touched = repository
        .update_by(
            &Conditions::from(Condition::raw("views > 100")),
            &doc! { "views" => 0 },
            false,
        )
        .unwrap();
    assert_eq!(touched, 2);
    assert_eq!(hooks.post_loads.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.pre_saves.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.post_saves.load(Ordering::SeqCst), 2);

    let statements = driver.statements();
    assert_eq!(statements[1].0, "UPDATE posts SET views = ? WHERE id = ?");
    assert_eq!(statements[1].1, vec![Value::I64(0), Value::I64(1)]);
    assert_eq!(statements[2].1, vec![Value::I64(0), Value::I64(2)]);
}

#[test]
fn updating_a_vanished_row_reports_failure() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "one" }]);
    let repository = post_repository(driver.clone());

    let mut post = repository.load_by_id(1).unwrap().unwrap();
    post.set("views", 9).unwrap();
    driver.expect_affected(0);
    assert!(!repository.save(&mut post).unwrap());
    // the change is still pending
    assert!(!post.dirty_columns().is_empty());
}

#[test]
fn clean_ref_tables_removes_orphaned_junction_rows() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_column(vec![Value::I64(7), Value::I64(7), Value::I64(9)]);
    driver.expect_affected(3);
    let repository = post_repository(driver.clone());

    let removed = repository.clean_ref_tables().unwrap();
    assert_eq!(removed, 3);
    let statements = driver.statements();
    assert_eq!(
        statements[0].0,
        "SELECT post_tags.post_id FROM post_tags \
         LEFT JOIN posts o ON o.id = post_tags.post_id \
         WHERE o.id IS NULL"
    );
    assert_eq!(statements[1].0, "DELETE FROM post_tags WHERE post_id IN (?, ?)");
    assert_eq!(statements[1].1, vec![Value::I64(7), Value::I64(9)]);
}

#[test]
fn a_vetoing_pre_save_hook_aborts_quietly() {
    let driver = Arc::new(MockSqlDriver::new());
    let hooks = Arc::new(CountingHooks {
        veto_save: true,
        ..Default::default()
    });
    let repository = post_repository(driver.clone()).with_hooks(hooks.clone());

    let mut post = repository.create(&doc! { "title" => "draft" }, true).unwrap();
    assert!(!repository.save(&mut post).unwrap());
    assert!(post.is_new());
    assert!(driver.statements().is_empty());
    assert_eq!(hooks.post_saves.load(Ordering::SeqCst), 0);
}

#[test]
fn bulk_update_renders_raw_conditions_verbatim() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_affected(3);
    let repository = post_repository(driver.clone());

    let affected = repository
        .update_by(
            &Conditions::new()
                .and(Condition::raw_with("views > ?", vec![10]))
                .and(Condition::eq("title", "hot")),
            &doc! { "views" => 0 },
            true,
        )
        .unwrap();
    assert_eq!(affected, 3);
    let (sql, params) = &driver.statements()[0];
    assert_eq!(
        sql,
        "UPDATE posts SET views = ? WHERE views > ? AND title = ?"
    );
    assert_eq!(
        params,
        &vec![Value::I64(0), Value::I64(10), Value::from("hot")]
    );
}

#[test]
fn load_related_covers_all_three_junction_shapes() {
    let driver = Arc::new(MockSqlDriver::new());
    driver.expect_rows(vec![doc! { "id" => 1, "title" => "post", "author_id" => 3 }]);
    let repository = post_repository(driver.clone());
    let post = repository.load_by_id(1).unwrap().unwrap();

    driver.expect_rows(vec![doc! { "id" => 3, "name" => "Ada" }]);
    let author = repository.load_related_one(&post, "author").unwrap().unwrap();
    assert_eq!(author.get("name").unwrap(), Value::from("Ada"));
    assert_eq!(
        driver.statements()[1].0,
        "SELECT id, name FROM users WHERE id = ? LIMIT 1"
    );

    driver.expect_rows(vec![doc! { "id" => 5, "post_id" => 1, "body" => "nice" }]);
    let comments = repository
        .load_related(&post, "comments", &Conditions::new(), &QueryOptions::default())
        .unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(
        driver.statements()[2].0,
        "SELECT id, post_id, body FROM comments WHERE post_id = ?"
    );

    driver.expect_rows(vec![doc! { "id" => 10, "name" => "rust" }]);
    let tags = repository
        .load_related(&post, "tags", &Conditions::new(), &QueryOptions::default())
        .unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(
        driver.statements()[3].0,
        "SELECT b.id, b.name FROM post_tags \
         INNER JOIN tags b ON b.id = post_tags.tag_id \
         WHERE post_tags.post_id = ?"
    );

    driver.expect_column(vec![Value::I64(2)]);
    let mut post = post;
    assert_eq!(repository.count_related(&mut post, "tags", None).unwrap(), 2);

    driver.expect_column(vec![Value::I64(4)]);
    repository
        .count_related(&mut post, "comments", Some("comment_count"))
        .unwrap();
    assert_eq!(post.get("comment_count").unwrap(), Value::I64(4));
}
