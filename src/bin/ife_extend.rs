//! Incremental font extension from the command line.
//!
//! Expands an RLE encoded base payload, injects one or more glyph bundle
//! files into it, validates the result, and writes out the patched base.

use clap::Parser;
use incremental_font_engine::base_header::parse_base_header;
use incremental_font_engine::bundle::GlyphBundle;
use incremental_font_engine::cmap::{self, CmapMapping};
use incremental_font_engine::inject::inject_glyph_bundle;
use incremental_font_engine::rle::expand_base;
use incremental_font_engine::sanitize::sanitize_base;
use incremental_font_engine::validate::check_base;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Expand an RLE encoded base font and patch glyph bundles into it."
)]
struct Args {
    /// The base payload as served by the backend (header prefix + RLE body).
    #[arg(short, long)]
    base: std::path::PathBuf,

    /// Glyph bundle files to inject, in order.
    #[arg(short = 'g', long = "bundle")]
    bundles: Vec<std::path::PathBuf>,

    /// Where to write the patched base.
    #[arg(short, long)]
    output: std::path::PathBuf,
}

fn main() {
    let args = Args::parse();

    let payload = std::fs::read(&args.base).unwrap_or_else(|e| {
        panic!(
            "Unable to read base payload ({}): {:?}",
            args.base.display(),
            e
        )
    });

    let info = parse_base_header(&payload).expect("Base header parsing failed");
    let mut base = expand_base(info.header_size as usize, &payload).expect("RLE expansion failed");
    println!(
        ">> Expanded base: {} glyphs, {} bytes",
        info.num_glyphs,
        base.len()
    );

    sanitize_base(&info, &mut base).expect("Base sanitizing failed");
    cmap::write_cmap12(&info, &mut base).expect("cmap12 write failed");
    cmap::write_cmap4(&info, &mut base).expect("cmap4 write failed");
    check_base(&info, &base).expect("Sanitized base failed validation");

    let mapping = CmapMapping::from_file_info(&info);
    let glyph_to_code = mapping.reverse();

    for path in &args.bundles {
        println!(">> Injecting {}", path.display());
        let bytes = std::fs::read(path)
            .unwrap_or_else(|e| panic!("Unable to read bundle ({}): {:?}", path.display(), e));
        let bundle = GlyphBundle::read(&bytes).expect("Bundle parsing failed");
        println!(
            "   {} glyphs, {} data bytes",
            bundle.glyphs.len(),
            bundle.data_len()
        );
        inject_glyph_bundle(&info, &mut base, &bundle, &mapping, &glyph_to_code)
            .expect("Injection failed");
        check_base(&info, &base).expect("Patched base failed validation");
    }

    std::fs::write(&args.output, &base).expect("Writing patched base failed");
    println!(">> Wrote patched base to {}", args.output.display());
}
