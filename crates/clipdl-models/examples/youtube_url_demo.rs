//! Demo: content ids, cache-relevant quality labels and clip ranges
//!
//! Run with: cargo run -p clipdl-models --example youtube_url_demo

use clipdl_models::{extract_youtube_id, validate_clip_range, AspectMode, Quality};

fn main() {
    let test_urls = [
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://youtu.be/dQw4w9WgXcQ?t=30",
        "https://www.youtube.com/shorts/abc123def45",
        "https://m.youtube.com/watch?v=dQw4w9WgXcQ&list=PLrAXtmRdnEQy",
        "https://vimeo.com/123456789",
    ];

    println!("{}", "=".repeat(60));
    for url in test_urls {
        match extract_youtube_id(url) {
            Ok(id) => println!("{:<65} -> {}", url, id),
            Err(e) => println!("{:<65} -> ({})", url, e),
        }
    }

    println!("\n{}", "=".repeat(60));
    for label in ["best", "1080p", "720", "4k"] {
        println!("{:<6} -> {}", label, Quality::from_label(label));
    }

    println!("\n{}", "=".repeat(60));
    for (start, end) in [("00:10:30", "00:20:45"), ("00:01:00", "00:00:30"), ("1:2:3", "00:00:10")] {
        match validate_clip_range(start, end) {
            Ok(range) => {
                for aspect in AspectMode::ALL {
                    println!(
                        "{} {} -> {}s, crop {:?}",
                        range.file_stem(),
                        aspect,
                        range.duration_secs(),
                        aspect.crop_filter()
                    );
                }
            }
            Err(e) => println!("{} .. {} -> {}", start, end, e),
        }
    }
}
