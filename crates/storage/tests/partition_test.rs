mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use common::TestDb;
use storage::{
    Client, DateRange, DbError, Document, IndexQuery, ObjectId, RangeMode, Topic, Unit, UpdateRequest, Value,
    CREATED_AT_FIELD,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn month(year: i32, month: u32) -> DateRange {
    DateRange::new(RangeMode::Month, year, month).unwrap()
}

fn invoice(customer: &str, y: i32, m: u32, d: u32) -> Document {
    let mut doc = Document::new().with("customer", customer).with("total", 100u64);
    doc.set_created_at(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap());
    doc
}

#[test]
fn test_monthly_partition_query() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    let mut march = invoice("acme", 2024, 3, 1);
    let id = client.create(&topic, model, &mut march, None).unwrap();
    assert_eq!(client.list_date_partitions().unwrap(), vec![month(2024, 3)]);

    let in_march = IndexQuery::new("created", "billing").interval(date(2024, 3, 1), date(2024, 3, 31));
    let found: Vec<Document> = client.find(model, &in_march).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].object_id(), id);

    let in_april = IndexQuery::new("created", "billing").interval(date(2024, 4, 1), date(2024, 4, 30));
    assert!(client.find::<Document>(model, &in_april).unwrap().is_empty());

    // secondary indexes are narrowed by the same interval
    let by_customer = IndexQuery::new("customer", "billing").eq("customer", "acme");
    assert_eq!(client.count(model, &by_customer).unwrap(), 1);
    assert_eq!(
        client
            .count(model, &by_customer.clone().interval(date(2024, 3, 2), date(2024, 3, 31)))
            .unwrap(),
        0
    );
    assert_eq!(
        client
            .count(model, &by_customer.interval(date(2024, 2, 1), date(2024, 3, 1)))
            .unwrap(),
        1
    );
}

#[test]
fn test_read_requires_date_for_field_partitioned_model() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    let mut doc = invoice("acme", 2024, 3, 15);
    let id = client.create(&topic, model, &mut doc, None).unwrap();

    assert!(matches!(
        client.read::<Document>(&topic, model, &id, None),
        Err(DbError::InvalidArgument(_))
    ));
    let read: Document = client.read_with_date(&topic, model, &id, date(2024, 3, 15), None).unwrap();
    assert_eq!(read.get("customer"), Some(&Value::from("acme")));

    // a partition that was never created holds nothing
    assert!(matches!(
        client.read_with_date::<Document>(&topic, model, &id, date(2023, 1, 1), None),
        Err(DbError::NotFound)
    ));

    let request = UpdateRequest::new().set("customer", "globex");
    client
        .update_with_date::<Document>(&topic, model, &id, date(2024, 3, 15), &request, None)
        .unwrap();
    let by_customer = IndexQuery::new("customer", "billing").eq("customer", "globex");
    assert_eq!(client.count(model, &by_customer).unwrap(), 1);

    client
        .delete_with_date::<Document>(&topic, model, &id, date(2024, 3, 15), None)
        .unwrap();
    assert_eq!(client.count(model, &by_customer).unwrap(), 0);
}

#[test]
fn test_id_partitioned_model_needs_no_date() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.event;
    let topic = Topic::from("audit");

    let mut doc = Document::new().with("kind", "login");
    let id = client.create(&topic, model, &mut doc, None).unwrap();

    let read: Document = client.read(&topic, model, &id, None).unwrap();
    assert_eq!(read.get("kind"), Some(&Value::from("login")));
    assert_eq!(id.to_date(), Utc::now().date_naive());
    let today = DateRange::from_date(Utc::now().date_naive(), RangeMode::Day).unwrap();
    assert_eq!(client.list_date_partitions().unwrap(), vec![today]);
}

#[test]
fn test_partition_field_cannot_be_updated() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    // created_at is filled in on create, so the partition is always known
    let mut doc = Document::new().with("customer", "acme");
    let id = client.create(&topic, model, &mut doc, None).unwrap();
    let day = doc.created_at().date_naive();

    let request = UpdateRequest::new().set(CREATED_AT_FIELD, Utc::now());
    assert!(matches!(
        client.update_with_date::<Document>(&topic, model, &id, day, &request, None),
        Err(DbError::InvalidArgument(_))
    ));
    let request = UpdateRequest::new().set("customer", "globex");
    client
        .update_with_date::<Document>(&topic, model, &id, day, &request, None)
        .unwrap();
}

#[test]
fn test_id_partitioned_query_by_interval() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.event;
    let topic = Topic::from("audit");

    let old_ms = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap().timestamp_millis() as u64;
    let mut old = Document::new().with("kind", "login");
    old.set_object_id(ObjectId::from_parts(old_ms, 1, rand::random()));
    client.create(&topic, model, &mut old, None).unwrap();

    let mut recent = Document::new().with("kind", "login");
    client.create(&topic, model, &mut recent, None).unwrap();

    let logins = IndexQuery::new("kind", "audit").eq("kind", "login");
    assert_eq!(client.count(model, &logins).unwrap(), 2);
    let january = logins.clone().interval(date(2024, 1, 10), date(2024, 1, 10));
    let found: Vec<Document> = client.find(model, &january).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].object_id(), old.object_id());
}

#[test]
fn test_add_list_delete_partitions() {
    let db = TestDb::open();
    let client = &db.client;

    assert!(client.list_date_partitions().unwrap().is_empty());
    let ranges = vec![month(2024, 1), month(2024, 2)];
    client.add_date_partitions(&ranges).unwrap();
    client.add_date_partitions(&ranges).unwrap();
    let mut listed = client.list_date_partitions().unwrap();
    listed.sort();
    assert_eq!(listed, ranges);

    assert!(matches!(
        client.add_date_partitions(&[DateRange::null()]),
        Err(DbError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.delete_date_partitions(&[DateRange::null()]),
        Err(DbError::InvalidArgument(_))
    ));

    assert_eq!(client.delete_date_partitions(&[month(2024, 1), month(2030, 1)]).unwrap(), 1);
    assert_eq!(client.list_date_partitions().unwrap(), vec![month(2024, 2)]);
}

#[test]
fn test_deleting_partition_drops_its_objects() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    let mut doc = invoice("acme", 2024, 5, 20);
    let id = client.create(&topic, model, &mut doc, None).unwrap();
    assert_eq!(client.delete_date_partitions(&[month(2024, 5)]).unwrap(), 1);

    assert!(matches!(
        client.read_with_date::<Document>(&topic, model, &id, date(2024, 5, 20), None),
        Err(DbError::NotFound)
    ));
    let all = IndexQuery::new("customer", "billing");
    assert_eq!(client.count(model, &all).unwrap(), 0);

    // writing into the range again recreates the partition empty
    let mut again = invoice("acme", 2024, 5, 21);
    client.create(&topic, model, &mut again, None).unwrap();
    assert_eq!(client.count(model, &all).unwrap(), 1);
}

#[test]
fn test_concurrent_partition_creation() {
    let db = TestDb::open();
    std::thread::scope(|s| {
        for _ in 0..8 {
            let client = db.client.clone();
            s.spawn(move || client.add_date_partitions(&[month(2025, 6)]).unwrap());
        }
    });
    assert_eq!(db.client.list_date_partitions().unwrap(), vec![month(2025, 6)]);
}

#[test]
fn test_partitions_are_discovered_on_reopen() {
    let db = TestDb::open();
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    db.client.add_date_partitions(&[month(2023, 12)]).unwrap();
    let mut doc = invoice("acme", 2024, 3, 1);
    let id = db.client.create(&topic, model, &mut doc, None).unwrap();
    db.client.close().unwrap();

    let client = Client::new();
    client.register_models(&db.models.all());
    client.open(&db.config).unwrap();
    let mut listed = client.list_date_partitions().unwrap();
    listed.sort();
    assert_eq!(listed, vec![month(2023, 12), month(2024, 3)]);
    let read: Document = client.read_with_date(&topic, model, &id, date(2024, 3, 1), None).unwrap();
    assert_eq!(read.object_id(), id);
    client.close().unwrap();
}

#[test]
fn test_partition_date_outside_supported_years_is_rejected() {
    let db = TestDb::open();
    let model = &db.models.invoice;
    let topic = Topic::from("billing");

    for year in [0, 10_000] {
        let mut doc = invoice("acme", year, 1, 1);
        let err = db.client.create(&topic, model, &mut doc, None).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)), "{:?}", err);
    }
    let mut doc = invoice("acme", 9999, 12, 31);
    db.client.create(&topic, model, &mut doc, None).unwrap();

    let by_customer = IndexQuery::new("customer", "billing").eq("customer", "acme");
    assert_eq!(db.client.count(model, &by_customer).unwrap(), 1);
    assert_eq!(db.client.list_date_partitions().unwrap(), vec![month(9999, 12)]);
    db.client.close().unwrap();

    let client = Client::new();
    client.register_models(&db.models.all());
    client.open(&db.config).unwrap();
    assert_eq!(client.list_date_partitions().unwrap(), vec![month(9999, 12)]);
    client.close().unwrap();
}

#[test]
fn test_model_topics_per_partition() {
    let db = TestDb::open();
    let client = &db.client;
    let model = &db.models.invoice;

    let mut march = invoice("acme", 2024, 3, 5);
    client.create(&Topic::from("eu"), model, &mut march, None).unwrap();
    let mut april = invoice("acme", 2024, 4, 5);
    client.create(&Topic::from("us"), model, &mut april, None).unwrap();

    assert_eq!(
        client.list_model_topics(model, None).unwrap(),
        vec![Topic::from("eu"), Topic::from("us")]
    );
    assert_eq!(
        client.list_model_topics(model, Some(month(2024, 3))).unwrap(),
        vec![Topic::from("eu")]
    );
    assert!(client.list_model_topics(model, Some(month(2020, 1))).unwrap().is_empty());
    assert!(client.list_model_topics(model, Some(DateRange::null())).unwrap().is_empty());

    client.delete_date_partitions(&[month(2024, 4)]).unwrap();
    assert_eq!(client.list_model_topics(model, None).unwrap(), vec![Topic::from("eu")]);
    client.close().unwrap();

    let client = Client::new();
    client.register_models(&db.models.all());
    client.open(&db.config).unwrap();
    assert_eq!(client.list_model_topics(model, None).unwrap(), vec![Topic::from("eu")]);
    client.close().unwrap();
}
