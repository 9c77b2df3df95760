use serde_json::json;
use staged_query::prelude::*;

#[cfg(feature = "sqlite")]
mod sqlite_tests {
    use super::*;
    use staged_query::versioning::PlainDiffFormatter;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::build(vec![
            TypeDecl::new("Page")
                .field("Title", FieldKind::String)
                .has_one("Parent", "Page")
                .versioned(),
            TypeDecl::new("NewsPage")
                .extends("Page")
                .field("Summary", FieldKind::String),
            TypeDecl::new("Article")
                .field("Title", FieldKind::String)
                .has_one("Writer", "Member")
                .has_one("Editor", "Member")
                .many_many("Tags", "Tag")
                .has_many("Comments", "Comment", None),
            TypeDecl::new("FeaturedArticle")
                .extends("Article")
                .field("Title", FieldKind::String)
                .field("Badge", FieldKind::String),
            TypeDecl::new("Member").field("Name", FieldKind::String),
            TypeDecl::new("Tag")
                .field("Label", FieldKind::String)
                .belongs_many_many("Articles", "Article", Some("Tags")),
            TypeDecl::new("Comment")
                .field("Body", FieldKind::String)
                .has_one("Article", "Article"),
        ])
        .unwrap()
    }

    async fn store() -> EntityStore<SqliteBackend> {
        let backend = SqliteBackend::memory().await.unwrap();
        let store = EntityStore::new(backend, catalog()).with_actor(FixedActor(7));
        store.initialize_schema().await.unwrap();
        store
    }

    async fn create(store: &EntityStore<SqliteBackend>, type_name: &str, fields: &[(&str, serde_json::Value)]) -> Record {
        let mut record = Record::new(type_name);
        for (field, value) in fields {
            record.set(*field, value.clone());
        }
        store.write(&mut record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let store = store().await;
        let member = create(&store, "Member", &[("Name", json!("Ann"))]).await;
        let id = member.id().unwrap();

        let loaded = store
            .get_by_id("Member", id, ReadingMode::DefaultStage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.type_name(), "Member");
        assert_eq!(loaded.get_str("Name"), Some("Ann"));
        assert_eq!(loaded.get_str("ClassName"), Some("Member"));
        assert!(loaded.get_str("Created").is_some());
        assert!(!loaded.is_dirty());
    }

    #[tokio::test]
    async fn test_subtype_rows_hydrate_as_subtype() {
        let store = store().await;
        create(&store, "Article", &[("Title", json!("Plain"))]).await;
        create(&store, "FeaturedArticle", &[("Title", json!("Shiny")), ("Badge", json!("Gold"))]).await;

        let mut all = store.query("Article").unwrap();
        all.sort("Title", SortDirection::Asc).unwrap();
        let records = store.fetch(&all).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].type_name(), "Article");
        assert_eq!(records[1].type_name(), "FeaturedArticle");

        let featured = store.query("FeaturedArticle").unwrap();
        let records = store.fetch(&featured).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("Badge"), Some("Gold"));
        assert_eq!(store.count(&featured).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_colliding_column_prefers_most_derived_table() {
        let store = store().await;
        let featured = create(&store, "FeaturedArticle", &[("Title", json!("Derived"))]).await;
        store
            .raw_execute(
                "UPDATE \"Article\" SET \"Title\" = ? WHERE \"ID\" = ?",
                &[json!("Base"), json!(featured.id().unwrap())],
            )
            .await
            .unwrap();

        let query = store.query("FeaturedArticle").unwrap();
        let records = store.fetch(&query).await.unwrap();
        assert_eq!(records[0].get_str("Title"), Some("Derived"));

        let base = store.query("Article").unwrap();
        let records = store.fetch(&base).await.unwrap();
        assert_eq!(records[0].get_str("Title"), Some("Base"));
    }

    #[tokio::test]
    async fn test_unknown_class_falls_back_to_base_type() {
        let store = store().await;
        let article = create(&store, "Article", &[("Title", json!("Ghostly"))]).await;
        store
            .raw_execute(
                "UPDATE \"Article\" SET \"ClassName\" = 'Ghost' WHERE \"ID\" = ?",
                &[json!(article.id().unwrap())],
            )
            .await
            .unwrap();
        let query = store.query("Article").unwrap();
        let records = store.fetch(&query).await.unwrap();
        assert_eq!(records[0].type_name(), "Article");
    }

    #[tokio::test]
    async fn test_lazy_fields_load_without_marking_changes() {
        let store = store().await;
        create(&store, "NewsPage", &[("Title", json!("News")), ("Summary", json!("Short"))]).await;

        let query = store.query("Page").unwrap();
        let mut record = store.fetch_one(&query).await.unwrap().unwrap();
        assert_eq!(record.type_name(), "NewsPage");
        assert_eq!(record.get("Summary"), None);

        store.load_lazy_fields(&mut record).await.unwrap();
        assert_eq!(record.get_str("Summary"), Some("Short"));
        assert!(!record.is_dirty());
    }

    #[tokio::test]
    async fn test_each_write_records_next_version() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("v1"))]).await;
        assert_eq!(page.version(), Some(1));
        for title in ["v2", "v3"] {
            page.set("Title", json!(title));
            store.write(&mut page).await.unwrap();
        }
        assert_eq!(page.version(), Some(3));
        let id = page.id().unwrap();

        let versions: Vec<i64> = store
            .all_versions("Page", id)
            .await
            .unwrap()
            .iter()
            .filter_map(Record::version)
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);

        let mut latest = store.query("Page").unwrap();
        latest.mode(ReadingMode::LatestVersions);
        let records = store.fetch(&latest).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version(), Some(3));
        assert_eq!(records[0].get_str("Title"), Some("v3"));
        assert_eq!(records[0].get_i64("AuthorID"), Some(7));

        let second = store.get_version("Page", id, 2).await.unwrap().unwrap();
        assert_eq!(second.get_str("Title"), Some("v2"));
    }

    #[tokio::test]
    async fn test_subtype_history_joins_on_version() {
        let store = store().await;
        let mut page = create(&store, "NewsPage", &[("Title", json!("a")), ("Summary", json!("first"))]).await;
        page.set("Summary", json!("second"));
        store.write(&mut page).await.unwrap();

        let first = store.get_version("NewsPage", page.id().unwrap(), 1).await.unwrap().unwrap();
        assert_eq!(first.get_str("Summary"), Some("first"));
        assert_eq!(first.get_str("Title"), Some("a"));
        let second = store.get_version("NewsPage", page.id().unwrap(), 2).await.unwrap().unwrap();
        assert_eq!(second.get_str("Summary"), Some("second"));
    }

    #[tokio::test]
    async fn test_publish_copies_draft_to_live() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("Draft"))]).await;
        let id = page.id().unwrap();
        assert!(!store.is_published(&page).await.unwrap());

        let published = store
            .publish(&page, PublishSource::Stage("Stage".into()), "Live", false)
            .await
            .unwrap();
        assert!(published);
        assert!(store.is_published(&page).await.unwrap());
        assert!(!store.stages_differ(&page, "Stage", "Live").await.unwrap());

        let mut live = store.query("Page").unwrap();
        live.mode(ReadingMode::stage("Live"));
        let records = store.fetch(&live).await.unwrap();
        assert_eq!(records[0].get_str("Title"), Some("Draft"));
        assert_eq!(records[0].version(), Some(1));

        let rows = store
            .raw_query(
                "SELECT \"WasPublished\", \"PublisherID\" FROM \"Page_versions\" WHERE \"RecordID\" = ? AND \"Version\" = ?",
                &[json!(id), json!(1)],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get_bool("WasPublished"), Some(true));
        assert_eq!(rows[0].get_i64("PublisherID"), Some(7));

        page.set("Title", json!("Edited"));
        store.write(&mut page).await.unwrap();
        assert!(store.stages_differ(&page, "Stage", "Live").await.unwrap());
        let records = store.fetch(&live).await.unwrap();
        assert_eq!(records[0].get_str("Title"), Some("Draft"));

        store.delete_from_stage(&page, "Live").await.unwrap();
        assert!(!store.is_published(&page).await.unwrap());
        assert!(store.fetch(&live).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_to_named_stage_leaves_draft_alone() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("Draft"))]).await;
        let id = page.id().unwrap();

        page.set("Title", json!("Hotfix"));
        let version = store
            .write_with(&mut page, WriteOptions::to_stage("Live"))
            .await
            .unwrap();
        assert_eq!(version, Some(2));

        let live = store
            .get_by_id("Page", id, ReadingMode::stage("Live"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.get_str("Title"), Some("Hotfix"));
        let draft = store
            .get_by_id("Page", id, ReadingMode::DefaultStage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.get_str("Title"), Some("Draft"));
        assert_eq!(store.version_number_by_stage("Page", id, "Live").await.unwrap(), Some(2));
        assert_eq!(store.version_number_by_stage("Page", id, "Stage").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_publish_missing_source_returns_false() {
        let store = store().await;
        let page = create(&store, "Page", &[("Title", json!("Only draft"))]).await;
        let published = store
            .publish(&page, PublishSource::Stage("Live".into()), "Stage", false)
            .await
            .unwrap();
        assert!(!published);
    }

    #[tokio::test]
    async fn test_rollback_appends_new_version() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("One"))]).await;
        for title in ["Two", "Three"] {
            page.set("Title", json!(title));
            store.write(&mut page).await.unwrap();
        }
        let id = page.id().unwrap();

        store.rollback(&mut page, 1).await.unwrap();
        assert_eq!(page.get_str("Title"), Some("One"));
        assert_eq!(page.version(), Some(4));

        let history = store.all_versions("Page", id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].get_str("Title"), Some("One"));
        assert_eq!(history[1].get_str("Title"), Some("Three"));

        let draft = store
            .get_by_id("Page", id, ReadingMode::DefaultStage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.get_str("Title"), Some("One"));
        assert_eq!(draft.version(), Some(4));

        let err = store.rollback(&mut page, 42).await.unwrap_err();
        assert!(matches!(err, QueryError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_compare_versions() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("First"))]).await;
        page.set("Title", json!("Second"));
        store.write(&mut page).await.unwrap();

        let diff = store.compare_versions("Page", page.id().unwrap(), 1, 2).await.unwrap();
        assert_eq!(diff.changed_fields().collect::<Vec<_>>(), vec!["Title"]);
        assert_eq!(diff.render(&PlainDiffFormatter), "Title: First -> Second");
    }

    #[tokio::test]
    async fn test_archive_reads_latest_version_before_date() {
        let store = store().await;
        let mut page = create(&store, "Page", &[("Title", json!("Old"))]).await;
        page.set("Title", json!("New"));
        store.write(&mut page).await.unwrap();

        let mut future = store.query("Page").unwrap();
        future.mode(ReadingMode::archive_at("2999-12-31 00:00:00"));
        let records = store.fetch(&future).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("Title"), Some("New"));

        let mut past = store.query("Page").unwrap();
        past.mode(ReadingMode::archive_at("2000-01-01 00:00:00"));
        assert!(store.fetch(&past).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_prevents_write() {
        let mut store = store().await;
        store.add_validator("Page", |record: &Record| {
            match record.get_str("Title") {
                Some(title) if !title.is_empty() => vec![],
                _ => vec![Violation::on_field("Title", "required")],
            }
        });
        let mut page = Record::new("NewsPage");
        page.set("Summary", json!("no title"));
        let err = store.write(&mut page).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
        assert!(page.is_new());

        let query = store.query("Page").unwrap();
        assert_eq!(store.count(&query).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relations() {
        let store = store().await;
        let member = create(&store, "Member", &[("Name", json!("Ann"))]).await;
        let mut article = create(
            &store,
            "Article",
            &[("Title", json!("Relations")), ("WriterID", json!(member.id().unwrap()))],
        )
        .await;
        let article_id = article.id().unwrap();

        let writer = store.get_component(&mut article, "Writer").await.unwrap().unwrap();
        assert_eq!(writer.get_str("Name"), Some("Ann"));

        let mut by_writer = store.query("Article").unwrap();
        by_writer.filter("Writer.Name", ComparisonOp::Eq, json!("Ann")).unwrap();
        assert_eq!(store.count(&by_writer).await.unwrap(), 1);

        create(&store, "Comment", &[("Body", json!("first")), ("ArticleID", json!(article_id))]).await;
        create(&store, "Comment", &[("Body", json!("second")), ("ArticleID", json!(article_id))]).await;
        let comments = store.get_components(&article, "Comments").await.unwrap();
        assert_eq!(comments.len(), 2);

        let rust = create(&store, "Tag", &[("Label", json!("rust"))]).await;
        let sql = create(&store, "Tag", &[("Label", json!("sql"))]).await;
        store.attach(&article, "Tags", rust.id().unwrap()).await.unwrap();
        store.attach(&article, "Tags", rust.id().unwrap()).await.unwrap();
        store.attach(&article, "Tags", sql.id().unwrap()).await.unwrap();
        assert_eq!(store.get_components(&article, "Tags").await.unwrap().len(), 2);

        let articles = store.get_components(&rust, "Articles").await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id(), Some(article_id));

        store.detach(&article, "Tags", rust.id().unwrap()).await.unwrap();
        let tags = store.get_components(&article, "Tags").await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].get_str("Label"), Some("sql"));
    }

    #[tokio::test]
    async fn test_two_relations_to_the_same_type() {
        let store = store().await;
        let ann = create(&store, "Member", &[("Name", json!("Ann"))]).await;
        let bob = create(&store, "Member", &[("Name", json!("Bob"))]).await;
        create(
            &store,
            "Article",
            &[
                ("Title", json!("Edited")),
                ("WriterID", json!(ann.id().unwrap())),
                ("EditorID", json!(bob.id().unwrap())),
            ],
        )
        .await;
        create(&store, "Article", &[("Title", json!("Solo")), ("WriterID", json!(ann.id().unwrap()))]).await;

        let mut query = store.query("Article").unwrap();
        query
            .filter("Writer.Name", ComparisonOp::Eq, json!("Ann"))
            .unwrap()
            .filter("Editor.Name", ComparisonOp::Eq, json!("Bob"))
            .unwrap();
        let records = store.fetch(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("Title"), Some("Edited"));
    }

    #[tokio::test]
    async fn test_self_referencing_relation_filter() {
        let store = store().await;
        let root = create(&store, "Page", &[("Title", json!("Root"))]).await;
        create(&store, "Page", &[("Title", json!("Child")), ("ParentID", json!(root.id().unwrap()))]).await;

        let mut query = store.query("Page").unwrap();
        query.filter("Parent.Title", ComparisonOp::Eq, json!("Root")).unwrap();
        let titles = store.column(&query, "Title").await.unwrap();
        assert_eq!(titles, vec![json!("Child")]);

        query.mode(ReadingMode::Stage("Live".to_string()));
        assert!(store.fetch(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_to_many_filter_returns_each_record_once() {
        let store = store().await;
        let article = create(&store, "Article", &[("Title", json!("Popular"))]).await;
        let article_id = article.id().unwrap();
        for body in ["nice one", "nice two", "meh"] {
            create(&store, "Comment", &[("Body", json!(body)), ("ArticleID", json!(article_id))]).await;
        }
        create(&store, "Article", &[("Title", json!("Quiet"))]).await;

        let mut query = store.query("Article").unwrap();
        query.filter("Comments.Body", ComparisonOp::Like, json!("nice%")).unwrap();
        let records = store.fetch(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), Some(article_id));
        assert_eq!(store.count(&query).await.unwrap(), 1);
        assert_eq!(store.column(&query, "Title").await.unwrap(), vec![json!("Popular")]);
        assert_eq!(
            store.aggregate(&query, AggregateFunc::Count, "ID").await.unwrap(),
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_empty_filter_any_matches_nothing() {
        let store = store().await;
        create(&store, "Member", &[("Name", json!("Ann"))]).await;
        let mut query = store.query("Member").unwrap();
        query.filter_any(vec![]).unwrap();
        assert_eq!(store.count(&query).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_column_and_aggregate() {
        let store = store().await;
        for name in ["Bea", "Ann", "Cid"] {
            create(&store, "Member", &[("Name", json!(name))]).await;
        }
        let mut query = store.query("Member").unwrap();
        query.sort("Name", SortDirection::Asc).unwrap();
        let names = store.column(&query, "Name").await.unwrap();
        assert_eq!(names, vec![json!("Ann"), json!("Bea"), json!("Cid")]);

        let max = store.aggregate(&query, AggregateFunc::Max, "Name").await.unwrap();
        assert_eq!(max, json!("Cid"));
    }

    #[tokio::test]
    async fn test_delete_removes_every_owning_row() {
        let store = store().await;
        let featured = create(&store, "FeaturedArticle", &[("Title", json!("Gone")), ("Badge", json!("x"))]).await;
        store.delete(&featured, &ReadingMode::DefaultStage).await.unwrap();

        let rows = store.raw_query("SELECT * FROM \"FeaturedArticle\"", &[]).await.unwrap();
        assert!(rows.is_empty());
        let query = store.query("Article").unwrap();
        assert_eq!(store.count(&query).await.unwrap(), 0);
    }
}
