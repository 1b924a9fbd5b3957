//! Ordering and error-propagation properties of the stream operators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use stencil_core::{
    concat_merge, concurrent_apply, concurrent_apply_limited, fan_out, interleave_merge,
    sequential_apply, wait_until_done, Item, ItemError, ItemStream, Producer, Stage,
};

fn numbered(prefix: &str, count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| Item::new(format!("{prefix}{i}"), format!("{prefix}-{i}")))
        .collect()
}

fn names(items: &[Item]) -> Vec<String> {
    items.iter().map(|i| i.name.clone()).collect()
}

/// A producer that sleeps between items, so interleaving actually happens.
fn slow_producer(prefix: &'static str, count: usize, delay_ms: u64) -> Producer {
    Producer::new(move || {
        let (tx, stream) = ItemStream::channel();
        tokio::spawn(async move {
            for item in numbered(prefix, count) {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        stream
    })
}

// ---------------------------------------------------------------------------
// concat_merge
// ---------------------------------------------------------------------------

#[rstest]
#[case(vec![])]
#[case(vec![3])]
#[case(vec![2, 0, 3])]
#[case(vec![1, 1, 1, 1])]
#[tokio::test]
async fn concat_merge_yields_exact_concatenation(#[case] sizes: Vec<usize>) {
    let prefixes = ["a", "b", "c", "d"];
    let mut expected = Vec::new();
    let mut producers = Vec::new();
    for (size, prefix) in sizes.iter().zip(prefixes) {
        let items = numbered(prefix, *size);
        expected.extend(names(&items));
        producers.push(Producer::from_items(items));
    }

    let merged = concat_merge(producers).open().collect().await;
    assert_eq!(names(&merged), expected);
}

#[tokio::test]
async fn concat_merge_waits_for_slow_first_source() {
    let producers = vec![slow_producer("slow", 3, 20), Producer::from_items(numbered("fast", 3))];
    let merged = concat_merge(producers).open().collect().await;
    assert_eq!(
        names(&merged),
        vec!["slow0", "slow1", "slow2", "fast0", "fast1", "fast2"]
    );
}

// ---------------------------------------------------------------------------
// interleave_merge
// ---------------------------------------------------------------------------

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleave_merge_preserves_per_source_order(#[case] sources: usize) {
    let prefixes = ["p", "q", "r", "s"];
    let producers: Vec<Producer> = prefixes[..sources]
        .iter()
        .enumerate()
        .map(|(i, prefix)| slow_producer(*prefix, 5, 1 + i as u64))
        .collect();

    let merged = interleave_merge(producers).open().collect().await;
    assert_eq!(merged.len(), sources * 5);

    for prefix in &prefixes[..sources] {
        let own: Vec<String> = names(&merged)
            .into_iter()
            .filter(|n| n.starts_with(prefix))
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("{prefix}{i}")).collect();
        assert_eq!(own, expected, "order within source {prefix} changed");
    }
}

#[tokio::test]
async fn interleave_merge_of_nothing_is_empty() {
    let merged = interleave_merge(vec![]).open().collect().await;
    assert!(merged.is_empty());
}

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_apply_preserves_order_and_sees_prior_effects() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let stage = sequential_apply(move |item: Item| {
        let mut seen = recorder.lock().unwrap();
        seen.push(item.name.clone());
        let count = seen.len();
        item.with_content(count.to_string())
    });

    let out = stage
        .apply(Producer::from_items(numbered("v", 6)).open())
        .collect()
        .await;

    assert_eq!(names(&out), names(&numbered("v", 6)));
    let contents: Vec<_> = out.iter().map(|i| i.content.clone()).collect();
    assert_eq!(contents, vec!["1", "2", "3", "4", "5", "6"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_apply_maps_one_to_one() {
    let stage = concurrent_apply(|item: Item| {
        std::thread::sleep(Duration::from_millis(5));
        let upper = item.content.to_uppercase();
        item.with_content(upper)
    });

    let out = stage
        .apply(Producer::from_items(numbered("t", 20)).open())
        .collect()
        .await;

    assert_eq!(out.len(), 20);
    let unique: HashSet<_> = out.iter().map(|i| i.name.clone()).collect();
    assert_eq!(unique.len(), 20, "items must not be dropped or duplicated");
    assert!(out.iter().all(|i| i.content.starts_with("T-")));
}

#[rstest]
#[case::sequential(true)]
#[case::concurrent(false)]
#[tokio::test]
async fn failed_items_bypass_the_function(#[case] sequential: bool) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let f = move |item: Item| {
        counter.fetch_add(1, Ordering::SeqCst);
        item
    };
    let stage = if sequential {
        sequential_apply(f)
    } else {
        concurrent_apply(f)
    };

    let failed = Item::failed("broken.tpl", ItemError::Merge("earlier".into()));
    let input = Producer::from_items(vec![Item::new("ok.tpl", ""), failed.clone()]);
    let out = stage.apply(input.open()).collect().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(out.contains(&failed), "failed item must pass through unchanged");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_apply_limited_caps_in_flight_work() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let stage = concurrent_apply_limited(2, move |item: Item| {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        current.fetch_sub(1, Ordering::SeqCst);
        item
    });

    let out = stage
        .apply(Producer::from_items(numbered("w", 10)).open())
        .collect()
        .await;
    assert_eq!(out.len(), 10);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

// ---------------------------------------------------------------------------
// fan_out
// ---------------------------------------------------------------------------

fn tagging_sink(tag: &'static str) -> Stage {
    sequential_apply(move |item: Item| {
        let content = format!("{tag}:{}", item.content);
        item.with_content(content)
    })
}

#[tokio::test]
async fn fan_out_delivers_to_every_sink_in_order() {
    let stage = fan_out(vec![tagging_sink("one"), tagging_sink("two")]);
    let out = stage
        .apply(Producer::from_items(numbered("x", 3)).open())
        .collect()
        .await;

    let contents: Vec<_> = out.iter().map(|i| i.content.clone()).collect();
    assert_eq!(
        contents,
        vec!["one:x-0", "one:x-1", "one:x-2", "two:x-0", "two:x-1", "two:x-2"]
    );
}

#[tokio::test]
async fn fan_out_forwards_failures_once() {
    let stage = fan_out(vec![tagging_sink("one"), tagging_sink("two"), tagging_sink("three")]);
    let input = Producer::from_items(vec![
        Item::new("good", "g"),
        Item::failed("bad", ItemError::RecursionLimit { limit: 1 }),
    ]);

    let err = wait_until_done(stage.apply(input.open())).await.unwrap_err();
    assert_eq!(err.names(), vec!["bad"]);
}

#[tokio::test]
async fn fan_out_without_sinks_passes_items_through() {
    let out = fan_out(vec![])
        .apply(Producer::from_items(numbered("y", 2)).open())
        .collect()
        .await;
    assert_eq!(names(&out), vec!["y0", "y1"]);
}

#[tokio::test]
async fn many_producers_many_sinks_do_not_deadlock() {
    let producers: Vec<Producer> = ["a", "b", "c"]
        .iter()
        .map(|p| Producer::from_items(numbered(p, 10)))
        .collect();
    let stage = fan_out(vec![tagging_sink("s1"), tagging_sink("s2")]);
    let rendered = concurrent_apply(|item: Item| item).apply(interleave_merge(producers).open());

    let done = tokio::time::timeout(Duration::from_secs(10), wait_until_done(stage.apply(rendered)))
        .await
        .expect("pipeline should finish")
        .expect("no failures");
    assert_eq!(done.len(), 60);
}
