#[test]
fn ui() {
    let t = trybuild::TestCases::new();

    // Pass tests - valid usage patterns
    t.pass("tests/ui/pass/*.rs");
}
