// build.rs

fn main() {
    // --- Link against OpenGL ES 2.0 ---
    // The demo payload calls into libGLESv2 directly (the EGL and GBM
    // dependencies handle their own linking). pkg-config is the standard
    // way to find the right flags; if it fails, fall back to the common
    // linker line and hope the library lives in a default search path.

    if pkg_config::probe_library("glesv2").is_err() {
        eprintln!("pkg-config failed for 'glesv2'. Falling back to manual linking.");

        println!("cargo:rustc-link-lib=GLESv2");
        println!("cargo:rustc-link-search=/usr/lib");

        eprintln!(
            "Manual linking flags applied. Ensure the OpenGL ES 2.0 development \
             libraries are installed."
        );
    }
}
