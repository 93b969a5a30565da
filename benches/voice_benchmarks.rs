//! # Voice Performance Benchmarks
//!
//! Benchmarks for the hot paths of the player core.
//!
//! ## Benchmark Categories
//!
//! - **Natural Sort**: Ordering chapter and book names
//! - **Catalog Operations**: Loading and writing books
//! - **Bookmarks**: Ordering bookmarks by chapter and time
//! - **Sample Processing**: Tempo changes on PCM buffers
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark group
//! cargo bench natural
//! cargo bench catalog
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;
use tempfile::TempDir;
use voice::db::BookStore;
use voice::engine::{LinearResampler, SampleProcessor};
use voice::model::{Book, BookType, Bookmark, Chapter};
use voice::natural::{natural_cmp, natural_path_cmp};

fn create_chapter_names(count: usize) -> Vec<String> {
    (0..count)
        .rev()
        .map(|i| format!("Part {} - Chapter {}.mp3", i / 10 + 1, i % 10 + 1))
        .collect()
}

fn create_book(name: &str, chapters: usize) -> Book {
    let chapters = (1..=chapters)
        .map(|i| Chapter::new(format!("/audiobooks/{name}/{i}.mp3"), i.to_string(), 1_800_000))
        .collect();
    Book::new(format!("/audiobooks/{name}"), name, BookType::CollectionFolder, chapters)
        .expect("valid benchmark book")
}

/// Catalog with `books` books of 20 chapters each.
fn create_benchmark_store(books: usize) -> (TempDir, BookStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = BookStore::open(&temp_dir.path().join("benchmark_voice.db")).expect("Failed to open store");
    for i in 0..books {
        store
            .add_book(create_book(&format!("Book {i}"), 20))
            .expect("Failed to add book");
    }
    (temp_dir, store)
}

fn benchmark_natural_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("natural_sort");

    group.bench_function("compare_pair", |b| {
        b.iter(|| natural_cmp(black_box("Chapter 0009b"), black_box("chapter 10a")))
    });

    for count in [10, 100, 1000] {
        let names = create_chapter_names(count);
        group.bench_with_input(BenchmarkId::new("sort_names", count), &names, |b, names| {
            b.iter_batched(
                || names.clone(),
                |mut names| names.sort_by(|a, b| natural_cmp(a, b)),
                BatchSize::SmallInput,
            )
        });
    }

    let paths: Vec<std::path::PathBuf> = create_chapter_names(500)
        .into_iter()
        .map(|name| std::path::Path::new("/audiobooks/Saga").join(name))
        .collect();
    group.bench_function("sort_paths_500", |b| {
        b.iter_batched(
            || paths.clone(),
            |mut paths| paths.sort_by(|a, b| natural_path_cmp(a, b)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_catalog_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    let (_dir, store) = create_benchmark_store(100);

    group.bench_function("get_active_books_100", |b| {
        b.iter(|| black_box(store.get_active_books().expect("load books")))
    });

    let book = store.get_book(1).expect("query").expect("book 1");
    group.bench_function("update_position", |b| {
        let mut book = book.clone();
        let mut time = 0;
        b.iter(|| {
            time = (time + 1_000) % 1_800_000;
            book.time = time;
            store.update_book(&book).expect("update");
        })
    });

    group.bench_function("update_position_async", |b| {
        let mut book = book.clone();
        b.iter(|| {
            book.time = (book.time + 1_000) % 1_800_000;
            black_box(store.update_book_async(&book));
        });
        store.flush().expect("flush");
    });

    group.bench_function("add_book", |b| {
        b.iter_batched(
            || create_book("Fresh", 30),
            |book| store.add_book(book).expect("add"),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_bookmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bookmarks");

    for count in [10, 200] {
        let mut book = create_book("Marked", 40);
        book.bookmarks = (0..count)
            .rev()
            .map(|i| Bookmark::new(format!("/audiobooks/Marked/{}.mp3", i % 40 + 1), (i * 7_919) as i64, format!("mark {i}")))
            .collect();
        group.bench_with_input(BenchmarkId::new("sorted_bookmarks", count), &book, |b, book| {
            b.iter(|| black_box(book.sorted_bookmarks().expect("sort")))
        });
    }

    group.finish();
}

fn benchmark_sample_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_processing");
    let input: Vec<i16> = (0..44_100 * 2).map(|i| ((i % 200) as i16 - 100) * 100).collect();

    for speed in [1.0f32, 1.5, 2.0] {
        group.bench_with_input(BenchmarkId::new("resample_one_second", speed), &speed, |b, &speed| {
            let mut out = vec![0i16; input.len()];
            b.iter(|| {
                let mut processor = LinearResampler::new(44_100, 2);
                processor.set_speed(speed);
                processor.put_samples(&input);
                processor.flush();
                black_box(processor.receive_samples(&mut out))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_natural_sort,
    benchmark_catalog_operations,
    benchmark_bookmarks,
    benchmark_sample_processing
);
criterion_main!(benches);
