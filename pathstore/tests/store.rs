use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bson::{Bson, Document, bson, doc};
use rstest::{fixture, rstest};
use tokio::sync::mpsc;

use pathstore::{memory::InMemoryStore, prelude::*};

fn catalog() -> DocumentStoreBuilder<InMemoryStore> {
    DocumentStore::builder(InMemoryStore::new())
        .schema(
            "items",
            SchemaDescriptor::new()
                .id_type(IdType::Number)
                .field("price", FieldType::Number),
        )
}

/// In-memory backend that refuses to store change records.
#[derive(Debug, Default)]
struct UnrecordedStore(InMemoryStore);

#[async_trait]
impl StoreBackend for UnrecordedStore {
    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.0.find(collection, filter, options).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.0.aggregate(collection, pipeline).await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<()> {
        if collection == "datachanges" {
            return Err(DocumentStoreError::Backend("datachanges is read-only".into()));
        }
        self.0.insert_one(collection, document).await
    }

    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.0.update_one(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.0.delete_one(collection, filter).await
    }
}

#[fixture]
async fn payments() -> DocumentStore<InMemoryStore> {
    let backend = InMemoryStore::builder()
        .seed(
            "payments",
            vec![
                doc! { "_id": 1, "account": "a", "amount": 10 },
                doc! { "_id": 2, "account": "b", "amount": 5 },
                doc! { "_id": 3, "account": "a", "amount": 7.5 },
            ],
        )
        .seed("accounts", vec![doc! { "_id": "a", "name": "Alpha" }])
        .build()
        .await
        .unwrap();

    DocumentStore::builder(backend)
        .schema("payments", SchemaDescriptor::new().field("amount", FieldType::Number))
        .build()
}

#[rstest]
#[tokio::test]
async fn test_post_coerces_and_reads_back() {
    let store = catalog().build();

    let created = store
        .post("/items", bson!({ "_id": 1, "name": "desk", "price": "120" }), Some("ada"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.path, "/items/1");
    assert!(created.applied);
    assert_eq!(store.get("/items/1/price", &[]).await.unwrap(), Some(Bson::Int64(120)));
    assert_eq!(
        store.get("/items/1", &[QueryPair::new("select", "name")]).await.unwrap(),
        Some(bson!({ "_id": 1, "name": "desk" }))
    );
    assert_eq!(store.get("/items/2", &[]).await.unwrap(), None);
}

#[rstest]
#[tokio::test]
async fn test_post_over_existing_document_fails() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1 }), None).await.unwrap();

    let again = store.post("/items", bson!({ "_id": "1" }), None).await;

    assert!(matches!(again, Err(DocumentStoreError::CannotPostOverExistingDocument(id, _)) if id == "1"));
}

#[rstest]
#[tokio::test]
async fn test_generated_number_ids_increment() {
    let store = catalog().build();

    let first = store.post("/items", bson!({ "name": "a" }), None).await.unwrap().unwrap();
    let second = store.post("/items", bson!({ "name": "b" }), None).await.unwrap().unwrap();

    assert_eq!(first.id, Bson::Int64(1));
    assert_eq!(second.path, "/items/2");
}

#[rstest]
#[tokio::test]
async fn test_mismatched_id_degrades_to_none() {
    let store = catalog().build();

    assert!(store.post("/items", bson!({ "_id": "abc" }), None).await.unwrap().is_none());
    assert!(store.get("/items/abc", &[]).await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_string_id_types_an_empty_collection() {
    let store = DocumentStore::new(InMemoryStore::new());

    let created = store
        .post("/users", bson!({ "_id": "alice", "name": "A" }), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.id, Bson::String("alice".into()));
    assert_eq!(created.path, "/users/alice");
    assert_eq!(
        store.get("/users/alice", &[]).await.unwrap(),
        Some(bson!({ "_id": "alice", "name": "A" }))
    );
}

#[rstest]
#[tokio::test]
async fn test_reading_an_empty_collection_does_not_fix_its_id_type() {
    let store = DocumentStore::new(InMemoryStore::new());

    assert_eq!(store.get("/counters", &[]).await.unwrap(), Some(bson!([])));

    let created = store.post("/counters", bson!({ "_id": 5 }), None).await.unwrap().unwrap();
    assert_eq!(created.path, "/counters/5");
    assert_eq!(store.get("/counters/5", &[]).await.unwrap(), Some(bson!({ "_id": 5 })));
}

#[rstest]
#[tokio::test]
async fn test_huge_page_reads_nothing() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1 }), None).await.unwrap();

    let found = store
        .get(
            "/items",
            &[QueryPair::new("page", u64::MAX.to_string()), QueryPair::new("per_page", "2")],
        )
        .await
        .unwrap();

    assert_eq!(found, Some(bson!([])));
}

#[rstest]
#[tokio::test]
async fn test_wildcard_trigger_receives_matching_writes() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1, "a": 1 }), None).await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let (counter, paths) = (hits.clone(), seen.clone());
    store
        .on_changing("/items/*/a", move |event: TriggerEvent| {
            let (counter, paths) = (counter.clone(), paths.clone());
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                paths.lock().await.push(event.path);
                Ok(())
            }
        })
        .await;

    store
        .patch("/items/1", vec![Patch::replace("/a", 2)], None)
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().await, vec!["/items/1/a".to_string()]);
}

#[rstest]
#[tokio::test]
async fn test_write_survives_a_failed_change_record() {
    let notifier = BroadcastNotifier::new(16);
    let mut events = notifier.subscribe();
    let store = DocumentStore::builder(UnrecordedStore::default())
        .notifier(notifier)
        .build();

    let created = store.post("/notes", bson!({ "_id": "n1", "text": "hi" }), None).await;

    assert!(created.unwrap().is_some_and(|result| result.applied));
    assert_eq!(events.try_recv().unwrap().0, "data-changed/notes/n1");
    assert_eq!(store.get("/notes/n1/text", &[]).await.unwrap(), Some(bson!("hi")));
}

#[rstest]
#[tokio::test]
async fn test_put_delivers_consolidated_leaves_to_change_handlers() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1, "name": "desk" }), None).await.unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    store
        .on_change("/items/:id/meta", move |event: TriggerEvent| {
            let sender = sender.clone();
            async move {
                let _ = sender.send(event);
            }
        })
        .await;

    store
        .put("/items/1", bson!({ "name": "desk", "meta": { "color": "red", "size": 2 } }), Some("ada"))
        .await
        .unwrap();

    let event = receiver.recv().await.unwrap();
    assert_eq!(event.trigger, "/items/:id/meta");
    assert_eq!(event.path, "/items/1/meta");
    assert_eq!(event.params.get("id").map(String::as_str), Some("1"));
    assert_eq!(event.patches, vec![Patch::replace("/color", "red"), Patch::replace("/size", 2)]);
    assert_eq!(event.user.as_deref(), Some("ada"));
    assert_eq!(
        event.document,
        Some(bson!({ "_id": 1, "name": "desk", "meta": { "color": "red", "size": 2 } }))
    );

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(receiver.try_recv().is_err());
}

#[rstest]
#[tokio::test]
async fn test_changing_handler_rejects_write() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1, "price": 10 }), None).await.unwrap();

    store
        .on_changing("/items/:id/price", |event: TriggerEvent| async move {
            let negative = event
                .patches
                .iter()
                .filter_map(|patch| patch.value.as_ref())
                .any(|value| matches!(value, Bson::Int64(price) if *price < 0));
            match negative {
                true => Err("price must be positive".to_string()),
                false => Ok(()),
            }
        })
        .await;

    let rejected = store
        .patch("/items/1", vec![Patch::replace("/price", "-5")], None)
        .await;
    assert!(matches!(
        rejected,
        Err(DocumentStoreError::ChangeRejected(errors)) if errors == vec!["price must be positive".to_string()]
    ));
    assert_eq!(store.get("/items/1/price", &[]).await.unwrap(), Some(Bson::Int32(10)));

    store
        .patch("/items/1", vec![Patch::replace("/price", "12")], None)
        .await
        .unwrap();
    assert_eq!(store.get("/items/1/price", &[]).await.unwrap(), Some(Bson::Int64(12)));
}

#[rstest]
#[tokio::test]
async fn test_unchanged_patch_is_not_applied() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1, "name": "desk" }), None).await.unwrap();

    let result = store
        .patch("/items/1", vec![Patch::replace("/name", "desk")], None)
        .await
        .unwrap()
        .unwrap();

    assert!(!result.applied);
}

#[rstest]
#[tokio::test]
async fn test_append_and_delete() {
    let store = catalog().build();
    store.post("/items", bson!({ "_id": 1, "tags": ["old"] }), None).await.unwrap();

    let appended = store.post("/items/1/tags", bson!("new"), None).await.unwrap().unwrap();
    assert_eq!(appended.patches, vec![Patch::add("/tags/1", "new")]);
    assert_eq!(store.get("/items/1/tags", &[]).await.unwrap(), Some(bson!(["old", "new"])));

    store.delete("/items/1/tags", None).await.unwrap();
    assert_eq!(store.get("/items/1/tags", &[]).await.unwrap(), None);

    store.delete("/items/1", None).await.unwrap();
    assert_eq!(store.get("/items/1", &[]).await.unwrap(), None);
    assert!(matches!(
        store.patch("/items/1", vec![Patch::replace("/a", 1)], None).await,
        Err(DocumentStoreError::DocumentNotFound(..))
    ));
}

#[rstest]
#[tokio::test]
async fn test_writes_are_recorded_and_published() {
    let notifier = BroadcastNotifier::new(16);
    let mut events = notifier.subscribe();
    let store = catalog().notifier(notifier).build();

    store.post("/items", bson!({ "_id": 1, "name": "desk" }), Some("ada")).await.unwrap();
    store
        .patch("/items/1", vec![Patch::replace("/name", "table")], Some("bob"))
        .await
        .unwrap();

    let (topic, event) = events.try_recv().unwrap();
    assert_eq!(topic, "data-changed/items/1");
    assert_eq!(event.path, "/items/1");
    assert_eq!(event.user.as_deref(), Some("ada"));

    let changes = store
        .backend()
        .find(
            "datachanges",
            doc! { "path": "/items/1" },
            FindOptions { sort: Some(doc! { "date": 1 }), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].get_str("user").unwrap(), "ada");
    assert!(!changes[0].contains_key("lastChange"));
    assert!(changes[1].get_datetime("lastChange").is_ok());
}

#[rstest]
#[tokio::test]
async fn test_get_filters_sorts_and_pages(#[future] payments: DocumentStore<InMemoryStore>) {
    let store = payments.await;

    let found = store
        .get(
            "/payments",
            &[QueryPair::new("amount", "{gte}6"), QueryPair::new("sort_by", "-amount")],
        )
        .await
        .unwrap();

    assert_eq!(
        found,
        Some(bson!([
            { "_id": 1, "account": "a", "amount": 10 },
            { "_id": 3, "account": "a", "amount": 7.5 },
        ]))
    );
}

#[rstest]
#[tokio::test]
async fn test_agg_groups_a_page_of_members(#[future] payments: DocumentStore<InMemoryStore>) {
    let store = payments.await;

    let groups = store
        .agg(
            "/payments",
            false,
            &[
                QueryPair::new("group_by", "account,{project}total={sum}amount"),
                QueryPair::new("per_page", "2"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].get("_id"), Some(&Bson::String("a".into())));
    assert_eq!(groups[0].get("total"), Some(&Bson::Int64(10)));
    assert_eq!(groups[1].get("total"), Some(&Bson::Int64(5)));
    assert_eq!(groups[0].keys().last().map(String::as_str), Some("items"));
}

#[rstest]
#[tokio::test]
async fn test_agg_by_id_and_bad_directives(#[future] payments: DocumentStore<InMemoryStore>) {
    let store = payments.await;

    let one = store.agg("/payments/3", true, &[]).await.unwrap();
    assert_eq!(one, vec![doc! { "_id": 3, "account": "a", "amount": 7.5 }]);

    let invalid = store
        .agg("/payments", false, &[QueryPair::new("lookup", "accounts:_id")])
        .await;
    assert!(matches!(invalid, Err(DocumentStoreError::InvalidLookupParams(_))));
}

#[rstest]
#[tokio::test]
async fn test_agg_joins_declared_lookup(#[future] payments: DocumentStore<InMemoryStore>) {
    let store = payments.await;

    let joined = store
        .agg(
            "/payments",
            false,
            &[
                QueryPair::new("lookup", "accounts:_id:account:owner:unwind"),
                QueryPair::new("sort_by", "amount"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(joined.len(), 3);
    assert_eq!(joined[0].get("_id"), Some(&Bson::Int32(2)));
    assert!(!joined[0].contains_key("owner"));
    assert_eq!(joined[1].get_document("owner").unwrap(), &doc! { "_id": "a", "name": "Alpha" });
}

#[rstest]
#[tokio::test]
async fn test_inflate_fills_missing_fields() {
    let backend = InMemoryStore::builder()
        .seed(
            "users",
            vec![
                doc! { "_id": 1, "name": "Ada", "email": "ada@example.com" },
                doc! { "_id": 2, "name": "Bob", "email": "bob@example.com" },
            ],
        )
        .build()
        .await
        .unwrap();
    let store = DocumentStore::new(backend);

    let result = store
        .inflate(
            "users",
            vec![doc! { "_id": 1 }, doc! { "_id": 2, "name": "Robert" }, doc! { "name": "ghost" }],
            &["name", "email"],
            &[],
            &["_id"],
        )
        .await
        .unwrap();

    assert_eq!(
        result.inflated,
        vec![
            doc! { "_id": 1, "name": "Ada", "email": "ada@example.com" },
            doc! { "_id": 2, "name": "Robert", "email": "bob@example.com" },
        ]
    );
    assert_eq!(result.not_inflated, vec![doc! { "name": "ghost" }]);
}

#[rstest]
#[tokio::test]
async fn test_inflate_falls_back_to_later_keys() {
    let backend = InMemoryStore::builder()
        .seed("users", vec![doc! { "_id": 1, "name": "Ada", "email": "ada@example.com" }])
        .build()
        .await
        .unwrap();
    let store = DocumentStore::new(backend);

    let result = store
        .inflate(
            "users",
            vec![doc! { "_id": 99, "email": "ada@example.com" }],
            &["name"],
            &[],
            &["_id", "email"],
        )
        .await
        .unwrap();

    assert_eq!(
        result.inflated,
        vec![doc! { "_id": 99, "email": "ada@example.com", "name": "Ada" }]
    );
    assert!(result.not_inflated.is_empty());
}
