use super::*;

fn parse(yaml: &str) -> Result<SitesFile, ConfigError> {
    let file: SitesFile = serde_yaml::from_str(yaml).map_err(ConfigError::SitesFileParse)?;
    validate_sites(&file)?;
    Ok(file)
}

#[test]
fn minimal_site_gets_defaults() {
    let file = parse(
        r"
sites:
  - code: ah
    target_url: https://www.ah.nl/producten/olie
",
    )
    .unwrap();
    let site = &file.sites[0];
    assert_eq!(site.code, "ah");
    assert_eq!(site.display_name(), "ah");
    assert_eq!(site.max_pages, 20);
    assert_eq!(site.run_budget(), Duration::from_secs(300));
    assert_eq!(site.cooldowns.unlock(), Duration::from_secs(12 * 3600));
    assert_eq!(site.cooldowns.prewarm(), Duration::from_secs(6 * 3600));
    assert_eq!(site.page_walk, PageWalk::Single);
    assert!(site.archive_providers.is_empty());
    assert!(!site.prefer_archive);
    assert!(site.store.is_none());
}

#[test]
fn full_site_parses_page_walk_and_store() {
    let file = parse(
        r"
sites:
  - code: jumbo
    name: Jumbo
    target_url: https://www.jumbo.com/producten/olie
    home_url: https://www.jumbo.com/
    archive_providers: [memento, wayback, archive-today]
    prefer_archive: true
    max_pages: 8
    cooldowns:
      unlock_hours: 24
    page_walk:
      kind: offset
      param: offSet
      page_size: 24
      extra: [[pageSize, '24']]
    store:
      name: Jumbo Utrecht
      open_selector: button.store-picker
",
    )
    .unwrap();
    let site = file.find("JUMBO").unwrap();
    assert_eq!(site.display_name(), "Jumbo");
    assert_eq!(
        site.archive_providers,
        vec![
            ProviderName::Memento,
            ProviderName::Wayback,
            ProviderName::ArchiveToday
        ]
    );
    assert_eq!(site.cooldowns.unlock_hours, 24);
    assert_eq!(site.cooldowns.prewarm_hours, 6);
    assert_eq!(
        site.page_walk,
        PageWalk::Offset {
            param: "offSet".to_string(),
            page_size: 24,
            extra: vec![("pageSize".to_string(), "24".to_string())],
        }
    );
    assert_eq!(site.store.as_ref().unwrap().name, "Jumbo Utrecht");
}

#[test]
fn duplicate_codes_rejected_case_insensitively() {
    let result = parse(
        r"
sites:
  - code: ah
    target_url: https://www.ah.nl/a
  - code: AH
    target_url: https://www.ah.nl/b
",
    );
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("duplicate")),
        "expected duplicate validation error, got: {result:?}"
    );
}

#[test]
fn invalid_target_url_rejected() {
    let result = parse(
        r"
sites:
  - code: bad
    target_url: not a url
",
    );
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("target_url")),
        "expected target_url validation error, got: {result:?}"
    );
}

#[test]
fn unknown_provider_fails_to_parse() {
    let result = parse(
        r"
sites:
  - code: x
    target_url: https://x.example/
    archive_providers: [wayback, geocities]
",
    );
    assert!(
        matches!(result, Err(ConfigError::SitesFileParse(_))),
        "expected parse error, got: {result:?}"
    );
}

#[test]
fn zero_max_pages_rejected() {
    let result = parse(
        r"
sites:
  - code: x
    target_url: https://x.example/
    max_pages: 0
",
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn prefer_archive_without_providers_rejected() {
    let result = parse(
        r"
sites:
  - code: x
    target_url: https://x.example/
    prefer_archive: true
",
    );
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("prefer_archive")),
        "expected prefer_archive validation error, got: {result:?}"
    );
}

#[test]
fn code_with_path_characters_rejected() {
    let result = parse(
        r"
sites:
  - code: ../etc
    target_url: https://x.example/
",
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn load_sites_reports_missing_file() {
    let result = load_sites(Path::new("/definitely/not/here/sites.yaml"));
    assert!(
        matches!(result, Err(ConfigError::SitesFileIo { .. })),
        "expected SitesFileIo, got: {result:?}"
    );
}

#[test]
fn scroll_and_load_more_walks_parse() {
    let file = parse(
        r"
sites:
  - code: dirk
    target_url: https://www.dirk.nl/aanbiedingen
    page_walk:
      kind: scroll
  - code: vomar
    target_url: https://www.vomar.nl/aanbiedingen
    page_walk:
      kind: load_more
      selector: button.load-more
      max_clicks: 4
",
    )
    .unwrap();
    assert_eq!(file.sites[0].page_walk, PageWalk::Scroll { max_rounds: 10 });
    assert_eq!(
        file.sites[1].page_walk,
        PageWalk::LoadMore {
            selector: "button.load-more".to_string(),
            max_clicks: 4,
        }
    );
}

#[test]
fn load_more_without_selector_rejected() {
    let result = parse(
        r"
sites:
  - code: x
    target_url: https://x.example/
    page_walk:
      kind: load_more
      selector: '  '
",
    );
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("load_more")),
        "expected load_more validation error, got: {result:?}"
    );
}
