mod common;

use std::{sync::Arc, thread, time::Duration};

use tdb::{Node, PrivacyLevel, Tdb, Transport, Ulid};

const WAIT: Duration = Duration::from_secs(5);
const INIT: &str = "CREATE TABLE t (id INT PRIMARY KEY, v TEXT)";

fn open(node: &Node, cluster: &str, database: &str) -> Tdb {
    let mut tdb = Tdb::builder(cluster).node(node.clone()).build();
    tdb.open(database, INIT, "").unwrap();
    tdb
}

fn open_private(node: &Node, level: PrivacyLevel, seed: u8) -> Tdb {
    let (public_key, private_key) = common::key_pair(seed);
    let mut tdb = Tdb::builder("c1")
        .node(node.clone())
        .privacy_level(level)
        .keys(public_key, private_key)
        .build();
    tdb.open("orders", INIT, "").unwrap();
    tdb
}

#[test]
fn mutations_reach_peers_of_the_same_cluster() {
    let (_transport, nodes) = common::cluster(3);
    let a = open(&nodes[0], "c1", "orders");
    let b = open(&nodes[1], "c1", "orders");
    let other_cluster = open(&nodes[1], "c2", "orders");

    a.execute(
        "INSERT INTO t VALUES (1, 'a'); INSERT INTO t VALUES (2, 'b')",
        None,
    )
    .unwrap();
    a.execute("UPDATE t SET v = 'z' WHERE id = 2", None)
        .unwrap();

    assert!(common::wait_until(WAIT, || {
        b.count("t", "v = 'z'").unwrap() == 1
    }));
    assert_eq!(b.count("t", "").unwrap(), 2);
    assert_eq!(other_cluster.count("t", "").unwrap(), 0);
    // The third node never opened the database and ignores the statements.
    assert!(!nodes[2].contains("c1", "orders"));

    let published = nodes[0].replication_metrics();
    assert_eq!(published.published, 3);
    assert!(common::wait_until(WAIT, || {
        nodes[1].replication_metrics().applied == 3
    }));
    // Applied statements are not published again.
    assert_eq!(nodes[1].replication_metrics().published, 0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(nodes[0].replication_metrics().applied, 0);
}

#[test]
fn concurrent_writers_converge() {
    let (_transport, nodes) = common::cluster(2);
    let a = Arc::new(open(&nodes[0], "c1", "orders"));
    let b = open(&nodes[1], "c1", "orders");
    a.execute("INSERT INTO t VALUES (1, 'start')", None).unwrap();

    let writers = (0..4)
        .map(|writer| {
            let a = a.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    a.execute(
                        &format!("UPDATE t SET v = '{writer}-{round}' WHERE id = 1"),
                        None,
                    )
                    .unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.join().unwrap();
    }

    assert!(common::wait_until(WAIT, || {
        nodes[1].replication_metrics().applied == 201
    }));
    assert_eq!(nodes[0].replication_metrics().publish_failures, 0);
    assert_eq!(
        b.select_json("SELECT v FROM t").unwrap(),
        a.select_json("SELECT v FROM t").unwrap()
    );
}

#[test]
fn publish_flag_and_statement_kinds() {
    let (_transport, nodes) = common::cluster(2);
    let mut a = Tdb::builder("c1")
        .node(nodes[0].clone())
        .publish_changes(false)
        .build();
    a.open("orders", INIT, "").unwrap();
    let b = open(&nodes[1], "c1", "orders");

    a.execute("INSERT INTO t VALUES (1, 'local')", None).unwrap();
    a.execute("SELECT * FROM t", Some(true)).unwrap();
    assert_eq!(nodes[0].replication_metrics().published, 0);

    // DDL replicates like any other mutation.
    a.execute(
        "CREATE TABLE u (id INT); INSERT INTO u VALUES (1)",
        Some(true),
    )
    .unwrap();
    assert!(common::wait_until(WAIT, || {
        b.count("u", "").map(|count| count == 1).unwrap_or(false)
    }));
    assert_eq!(b.count("t", "").unwrap(), 0);
    assert_eq!(nodes[0].replication_metrics().published, 2);
}

#[test]
fn deferred_statements_publish_when_they_run() {
    let (_transport, nodes) = common::cluster(2);
    let a = open(&nodes[0], "c1", "orders");
    let b = open(&nodes[1], "c1", "orders");

    a.execute_async("INSERT INTO t VALUES (1, 'later')", None, 50)
        .unwrap();
    a.execute_async("INSERT INTO t VALUES (2, 'quiet')", Some(false), 50)
        .unwrap();
    assert!(common::wait_until(WAIT, || b.count("t", "").unwrap() == 1));
    assert!(common::wait_until(WAIT, || a.count("t", "").unwrap() == 2));
    assert_eq!(b.count("t", "v = 'later'").unwrap(), 1);
}

#[test]
fn destroy_local_stays_local() {
    let (_transport, nodes) = common::cluster(2);
    let mut a = open(&nodes[0], "c1", "orders");
    let b = open(&nodes[1], "c1", "orders");
    b.execute("INSERT INTO t VALUES (1, 'kept')", Some(false))
        .unwrap();

    a.destroy_local().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!nodes[0].contains("c1", "orders"));
    assert_eq!(b.count("t", "").unwrap(), 1);

    // Statements for a database this node no longer has are ignored.
    b.execute("INSERT INTO t VALUES (2, 'x')", None).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!nodes[0].contains("c1", "orders"));
    assert_eq!(nodes[0].replication_metrics().applied, 0);
}

#[test]
fn signed_statements_need_the_cluster_key() {
    let (_transport, nodes) = common::cluster(3);
    let a = open_private(&nodes[0], PrivacyLevel::Signed, 1);
    let same_key = open_private(&nodes[1], PrivacyLevel::Signed, 1);
    let other_key = open_private(&nodes[2], PrivacyLevel::Signed, 2);

    a.execute("INSERT INTO t VALUES (1, 'signed')", None).unwrap();
    assert!(common::wait_until(WAIT, || {
        same_key.count("t", "").unwrap() == 1
    }));
    assert!(common::wait_until(WAIT, || {
        nodes[2].replication_metrics().rejected == 1
    }));
    assert_eq!(other_key.count("t", "").unwrap(), 0);
}

#[test]
fn privacy_levels_must_match() {
    let (_transport, nodes) = common::cluster(2);
    let plain = open(&nodes[0], "c1", "orders");
    let signed = open_private(&nodes[1], PrivacyLevel::Signed, 1);

    plain.execute("INSERT INTO t VALUES (1, 'plain')", None).unwrap();
    assert!(common::wait_until(WAIT, || {
        nodes[1].replication_metrics().rejected == 1
    }));
    assert_eq!(signed.count("t", "").unwrap(), 0);

    signed.execute("INSERT INTO t VALUES (2, 'signed')", None).unwrap();
    assert!(common::wait_until(WAIT, || {
        nodes[0].replication_metrics().rejected == 1
    }));
    assert_eq!(plain.count("t", "").unwrap(), 1);
}

#[test]
fn encrypted_statements_are_opaque_on_the_wire() {
    let (transport, nodes) = common::cluster(2);
    let sniffer = Ulid::new();
    let wire = transport.attach(sniffer);

    let a = open_private(&nodes[0], PrivacyLevel::Encrypted, 9);
    let b = open_private(&nodes[1], PrivacyLevel::Encrypted, 9);

    a.execute("INSERT INTO t VALUES (1, 'top-secret')", None)
        .unwrap();
    assert!(common::wait_until(WAIT, || {
        b.count("t", "v = 'top-secret'").unwrap() == 1
    }));

    let frame = wire.recv_timeout(WAIT).unwrap();
    let needle = b"top-secret";
    assert!(!frame.windows(needle.len()).any(|window| window == needle));
}

#[test]
fn corrupt_frames_are_rejected() {
    let (transport, nodes) = common::cluster(1);
    let tdb = open(&nodes[0], "c1", "orders");
    let intruder = Ulid::new();
    let _inbox = transport.attach(intruder);

    let delivered = transport
        .broadcast(intruder, b"definitely not an envelope")
        .unwrap();
    assert_eq!(delivered, 1);
    assert!(common::wait_until(WAIT, || {
        nodes[0].replication_metrics().rejected == 1
    }));
    assert_eq!(tdb.count("t", "").unwrap(), 0);
}

#[test]
fn dropped_nodes_leave_the_transport() {
    let (transport, mut nodes) = common::cluster(2);
    assert_eq!(transport.peers(), 2);
    nodes.pop();
    assert!(common::wait_until(WAIT, || transport.peers() == 1));
    assert_eq!(transport.broadcast(Ulid::new(), b"x").unwrap(), 1);
}
