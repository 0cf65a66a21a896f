//! Benchmarks the C9 Chunker's text-splitting strategies over a
//! medium-sized synthetic document. The teacher declares `criterion` as a
//! dev-dependency but only ever hand-rolls timing helpers in
//! `tests/unified_storage_benchmarks.rs`; this wires the crate itself
//! against the one CPU-bound hot path in this codebase that's worth
//! tracking (§4.9's recursive/adaptive splitting runs once per document on
//! every indexing Run).

use construction_rag::chunk::chunk_document;
use construction_rag::config::{ChunkingConfig, ChunkingStrategy};
use construction_rag::partition::elements::{
    DocumentMetadata, Element, ElementCategory, PartitionResult, ProcessingStrategy, StructuralMetadata,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn synthetic_result(paragraphs: usize) -> PartitionResult {
    let text_elements = (0..paragraphs)
        .map(|i| Element {
            id: format!("e{i}"),
            page: (i / 4) as u32 + 1,
            category: ElementCategory::Text,
            text: "The specified concrete mix shall achieve a 28-day compressive strength of \
                   4000 psi and be cured under moist conditions for a minimum of seven days. "
                .repeat(6),
            image_path: None,
            bounding_box: None,
            structural: StructuralMetadata {
                section_title: Some(format!("Section {}", i / 10)),
                ..Default::default()
            },
            enrichment: Default::default(),
        })
        .collect();

    PartitionResult {
        text_elements,
        table_elements: Vec::new(),
        extracted_pages: HashMap::new(),
        page_analysis: Vec::new(),
        document_metadata: DocumentMetadata { title: None, total_pages: (paragraphs / 4) as u32 + 1 },
        processing_strategy: ProcessingStrategy::Native,
    }
}

fn bench_chunking_strategies(c: &mut Criterion) {
    let result = synthetic_result(200);

    let mut group = c.benchmark_group("chunk_document");
    for strategy in [ChunkingStrategy::Adaptive, ChunkingStrategy::Recursive, ChunkingStrategy::Semantic] {
        let config = ChunkingConfig { strategy, ..ChunkingConfig::default() };
        group.bench_with_input(format!("{strategy:?}"), &config, |b, config| {
            b.iter(|| chunk_document(black_box(&result), black_box(config)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunking_strategies);
criterion_main!(benches);
