use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");

    // The core crate has no native dependencies; only the `ffmpeg` feature
    // links against FFmpeg, and only Windows lacks a pkg-config fallback.
    let links_ffmpeg = env::var_os("CARGO_FEATURE_FFMPEG").is_some();
    let on_windows = env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if links_ffmpeg && on_windows && env::var_os("FFMPEG_DIR").is_none() {
        println!(
            "cargo:warning=seekframe: the `ffmpeg` feature needs FFMPEG_DIR on Windows \
             (for example a vcpkg `installed/<triplet>` directory)."
        );
    }
}
