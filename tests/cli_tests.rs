#[test]
fn create_update_cli_tests() {
    trycmd::TestCases::new().case("tests/cmd/create-update-*.toml");
}

#[test]
fn make_fullfiles_cli_tests() {
    trycmd::TestCases::new().case("tests/cmd/make-fullfiles-*.toml");
}

#[test]
fn make_packs_cli_tests() {
    trycmd::TestCases::new().case("tests/cmd/make-packs-*.toml");
}
