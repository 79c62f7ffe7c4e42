//! Frame painting benchmarks: a full terminal window with and without the
//! system monospace font.
//! Run: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use termreel::action::{Action, LineContent, RowTarget};
use termreel::config::RenderConfig;
use termreel::render::TerminalPainter;
use termreel::scheduler::Frame;
use termreel::terminal::{ColorTag, Segment, TerminalBuffer};

fn busy_frame() -> Frame {
    let mut buffer = TerminalBuffer::new("bench");
    for index in 0..40 {
        buffer.apply(&Action::AddLine(LineContent::Segments(vec![
            Segment::new(format!("  ✓ step {index:02}"), ColorTag::Accent),
            Segment::new(" settled in 12ms", ColorTag::Faint),
        ])));
    }
    buffer.apply(&Action::TypeChar {
        row: RowTarget::Active,
        text: "cargo bench".to_owned(),
    });
    Frame {
        index: 0,
        scene_index: 0,
        scene_frame: 0,
        time_ms: 0,
        snapshot: Arc::new(buffer),
        cursor_drawn: true,
    }
}

fn bench_paint(c: &mut Criterion) {
    let config = RenderConfig::default();
    let frame = busy_frame();

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(50);

    let blocks = TerminalPainter::with_block_glyphs(&config).expect("block painter");
    group.bench_function("blocks_default_size", |b| {
        b.iter(|| black_box(blocks.render(black_box(&frame))))
    });

    let fonted = TerminalPainter::new(&config).expect("painter");
    let label = format!("font_default_size ({})", fonted.origin().describe());
    group.bench_function(label, |b| b.iter(|| black_box(fonted.render(black_box(&frame)))));

    group.finish();
}

criterion_group!(benches, bench_paint);
criterion_main!(benches);
