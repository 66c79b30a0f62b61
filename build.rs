fn main() {
    if let Err(err) = shadow_rs::ShadowBuilder::builder().build() {
        panic!("failed to generate build metadata: {err}");
    }
}
