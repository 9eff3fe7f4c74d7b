mod common;

use common::{Fruit, RecordingCollection, StoreCall, doc};
use docmirror::{
    ClusterPartition, Converter, DocumentCollection, DocumentLoader, DocumentPatch, DocumentQuery,
    InMemoryDocumentCollection, JsonConverter, LoadConfig, LoadedObjects, MirrorError,
    MirroredType, PartitionFilter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fruit_type(write_back: bool) -> MirroredType {
    MirroredType::builder("Fruit", "fruits")
        .identity_property("name")
        .write_back_patched_documents(write_back)
        .patch(DocumentPatch::new(1, |document| {
            document.insert("organic", json!(false));
            Ok(())
        }))
        .build()
        .unwrap()
}

fn loader_for(
    mirrored_type: MirroredType,
    collection: Arc<dyn DocumentCollection>,
    partition: Option<ClusterPartition>,
) -> DocumentLoader<Fruit> {
    let converter: Arc<dyn Converter<Fruit>> = Arc::new(JsonConverter::for_type(&mirrored_type));
    let config = LoadConfig {
        worker_count: 4,
        output_queue_capacity: 8,
        poll_interval_ms: 10,
        ..LoadConfig::default()
    };
    DocumentLoader::new(
        Arc::new(mirrored_type),
        collection,
        converter,
        config,
        partition,
    )
}

async fn seed(collection: &InMemoryDocumentCollection, count: usize) {
    for index in 0..count {
        collection
            .insert(doc(json!({"_id": format!("fruit-{index}"), "origin": "Spain"})))
            .await
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eager_load_patches_and_writes_back() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 50).await;
    collection
        .insert(doc(json!({"_id": "current", "origin": "Peru", "organic": true, "_formatVersion": 2})))
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection.clone(), None);
    let fruits = match loader.load_all().await.unwrap() {
        LoadedObjects::Materialized(fruits) => fruits,
        LoadedObjects::Streaming(_) => panic!("write-back types load eagerly"),
    };

    assert_eq!(fruits.len(), 51);
    assert!(fruits.iter().all(|fruit| fruit.organic.is_some()));

    for stored in collection.documents().await {
        assert_eq!(stored.format_version(), 2);
        assert!(stored.contains_field("organic"));
    }

    let report = loader.last_report().unwrap();
    assert_eq!(report.read, 51);
    assert_eq!(report.loaded, 51);
    assert_eq!(report.patched, 50);
    assert_eq!(report.written_back, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eager_load_only_keeps_owned_documents() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 60).await;

    let mut total = 0;
    for partition_id in 1..=3 {
        let partition = ClusterPartition::new(partition_id, 3).unwrap();
        let loader = loader_for(fruit_type(true), collection.clone(), Some(partition));
        let fruits = loader.load_all().await.unwrap().collect().await.unwrap();
        total += fruits.len();
    }
    assert_eq!(total, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routed_load_pushes_partition_down() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 30).await;

    let routed = MirroredType::builder("Fruit", "fruits")
        .identity_property("name")
        .load_documents_routed(true)
        .build()
        .unwrap();
    let partition = ClusterPartition::new(2, 2).unwrap();
    let loader = loader_for(routed, collection.clone(), Some(partition));
    let routed_fruits = loader.load_all().await.unwrap().collect().await.unwrap();

    let plain = loader_for(fruit_type(true), collection.clone(), Some(partition));
    let plain_fruits = plain.load_all().await.unwrap().collect().await.unwrap();
    assert_eq!(routed_fruits.len(), plain_fruits.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conversion_failure_aborts_eager_load() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 20).await;
    collection
        .insert(doc(json!({"_id": "broken", "origin": 42})))
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection.clone(), None);
    let err = match loader.load_all().await {
        Ok(_) => panic!("a partially converted population must not be returned"),
        Err(err) => err,
    };
    assert!(matches!(err, MirrorError::ConversionFailed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_version_aborts_eager_load() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    collection
        .insert(doc(json!({"_id": "future", "origin": "Mars", "_formatVersion": 9})))
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection, None);
    let err = loader.load_all().await.err().unwrap();
    assert!(matches!(err, MirrorError::UnknownDocumentVersion { version: 9, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streaming_load_does_not_write_back_and_restarts() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 100).await;

    let loader = loader_for(fruit_type(false), collection.clone(), None);
    let lazy = match loader.load_all().await.unwrap() {
        LoadedObjects::Streaming(lazy) => lazy,
        LoadedObjects::Materialized(_) => panic!("non write-back types stream"),
    };

    let first = lazy.stream().collect().await.unwrap();
    assert_eq!(first.len(), 100);
    assert!(first.iter().all(|fruit| fruit.organic == Some(false)));

    let second = lazy.stream().collect().await.unwrap();
    assert_eq!(second.len(), 100);

    for stored in collection.documents().await {
        assert_eq!(stored.format_version(), 1);
        assert!(!stored.contains_field("organic"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streaming_load_has_next_waits_for_items() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 3).await;

    let loader = loader_for(fruit_type(false), collection, None);
    let LoadedObjects::Streaming(lazy) = loader.load_all().await.unwrap() else {
        panic!("expected a streaming load");
    };

    let mut stream = lazy.stream();
    let mut seen = 0;
    while stream.has_next().await.unwrap() {
        assert!(stream.has_next().await.unwrap());
        stream.next().await.unwrap().unwrap();
        seen += 1;
    }
    assert_eq!(seen, 3);
    assert_eq!(stream.next().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streaming_load_surfaces_worker_errors() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 40).await;
    collection
        .insert(doc(json!({"_id": "broken", "origin": ["not", "a", "string"]})))
        .await
        .unwrap();

    let loader = loader_for(fruit_type(false), collection, None);
    let LoadedObjects::Streaming(lazy) = loader.load_all().await.unwrap() else {
        panic!("expected a streaming load");
    };

    let outcome = tokio::time::timeout(Duration::from_secs(10), lazy.stream().collect())
        .await
        .expect("streaming load hung after a worker failure");
    assert!(matches!(outcome, Err(MirrorError::ConversionFailed(_))));
}

#[tokio::test]
async fn excluded_types_load_nothing() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 5).await;

    let excluded = MirroredType::builder("Fruit", "fruits")
        .identity_property("name")
        .exclude_from_initial_load(true)
        .build()
        .unwrap();
    let loader = loader_for(excluded, collection, None);
    let fruits = loader.load_all().await.unwrap().collect().await.unwrap();
    assert!(fruits.is_empty());

    let single = loader.load_by_id(&json!("fruit-1")).await.unwrap();
    assert!(single.is_some());
}

#[tokio::test]
async fn load_by_id_patches_and_writes_back() {
    let collection = Arc::new(RecordingCollection::new("fruits"));
    collection
        .inner()
        .insert(doc(json!({"_id": "apple", "origin": "Spain"})))
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection.clone(), None);
    let apple = loader.load_by_id(&json!("apple")).await.unwrap().unwrap();
    assert_eq!(
        apple,
        Fruit {
            name: "apple".to_string(),
            origin: Some("Spain".to_string()),
            organic: Some(false),
        }
    );
    assert_eq!(
        collection.calls(),
        vec![StoreCall::Replace(json!("apple"), json!("apple"))]
    );

    let stored = collection.inner().documents().await;
    assert_eq!(stored[0].format_version(), 2);

    assert!(loader.load_by_id(&json!("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn load_by_id_outside_partition_is_an_error() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 10).await;

    let owners: Vec<u32> = (1..=2)
        .filter(|partition_id| {
            let partition = ClusterPartition::new(*partition_id, 2).unwrap();
            let filter = PartitionFilter::<Fruit>::partition(
                docmirror::RoutingKey::identity(),
                partition,
            );
            filter
                .document_partition()
                .unwrap()
                .contains(&doc(json!({"_id": "fruit-3"})))
                .unwrap()
        })
        .collect();
    assert_eq!(owners.len(), 1);
    let foreign = if owners[0] == 1 { 2 } else { 1 };

    let loader = loader_for(
        fruit_type(true),
        collection.clone(),
        Some(ClusterPartition::new(foreign, 2).unwrap()),
    );
    let err = loader.load_by_id(&json!("fruit-3")).await.unwrap_err();
    assert!(matches!(err, MirrorError::IllegalArgument(_)));

    let owner = loader_for(
        fruit_type(true),
        collection,
        Some(ClusterPartition::new(owners[0], 2).unwrap()),
    );
    assert!(owner.load_by_id(&json!("fruit-3")).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_by_query_uses_template_fields() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    collection
        .insert_all(vec![
            doc(json!({"_id": "apple", "origin": "Spain"})),
            doc(json!({"_id": "orange", "origin": "Spain"})),
            doc(json!({"_id": "lime", "origin": "Mexico"})),
        ])
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection.clone(), None);
    let template = Fruit {
        name: String::new(),
        origin: Some("Spain".to_string()),
        organic: None,
    };
    // An empty identity still takes part in the template query.
    let by_origin = loader
        .load_matching(
            &DocumentQuery::new().eq("origin", json!("Spain")),
            PartitionFilter::accept_all(),
        )
        .await
        .unwrap();
    assert_eq!(by_origin.len(), 2);
    assert!(loader.load_by_query(&template).await.unwrap().is_empty());

    let spanish_apples = loader
        .load_by_query(&Fruit::new("apple", "Spain"))
        .await
        .unwrap();
    assert_eq!(spanish_apples.len(), 1);

    let stored = collection.find_by_id(&json!("orange")).await.unwrap().unwrap();
    assert_eq!(stored.format_version(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_filter_selects_objects() {
    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    collection
        .insert_all(vec![
            doc(json!({"_id": "apple", "origin": "Spain"})),
            doc(json!({"_id": "avocado", "origin": "Mexico"})),
            doc(json!({"_id": "banana", "origin": "Ecuador"})),
        ])
        .await
        .unwrap();

    let loader = loader_for(fruit_type(true), collection, None);
    let starting_with_a = loader
        .load_matching(
            &DocumentQuery::new(),
            PartitionFilter::custom(|fruit: &Fruit| fruit.name.starts_with('a')),
        )
        .await
        .unwrap();
    assert_eq!(starting_with_a.len(), 2);
}

struct SlowConverter {
    inner: JsonConverter<Fruit>,
    started: Arc<std::sync::atomic::AtomicUsize>,
}

impl Converter<Fruit> for SlowConverter {
    fn to_document(&self, object: &Fruit) -> docmirror::Result<docmirror::Document> {
        self.inner.to_document(object)
    }

    fn from_document(&self, document: &docmirror::Document) -> docmirror::Result<Fruit> {
        self.started
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.inner.from_document(document)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_eager_load_stops_its_workers() {
    use std::sync::atomic::Ordering;

    let collection = Arc::new(InMemoryDocumentCollection::new("fruits"));
    seed(&collection, 200).await;

    let mirrored_type = fruit_type(true);
    let started = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let converter: Arc<dyn Converter<Fruit>> = Arc::new(SlowConverter {
        inner: JsonConverter::for_type(&mirrored_type),
        started: started.clone(),
    });
    let config = LoadConfig {
        worker_count: 2,
        await_termination_ms: 100,
        ..LoadConfig::default()
    };
    let loader = DocumentLoader::new(
        Arc::new(mirrored_type),
        collection.clone(),
        converter,
        config,
        None,
    );

    let err = loader.load_all().await.err().unwrap();
    assert!(matches!(err, MirrorError::Timeout(_)));

    let at_failure = started.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = started.load(Ordering::SeqCst);
    assert!(later <= at_failure + 2, "{later} conversions ran after {at_failure}");
    assert!(later < 200);

    for stored in collection.documents().await {
        assert_eq!(stored.format_version(), 1);
    }
}
