fn main() {
    println!("cargo:rerun-if-env-changed=FINGERLOCK_BUILD_DATE");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
