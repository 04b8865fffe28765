use assert_matches::assert_matches;

use market_assets::domain::{ArchiveKind, Locator, TableKey};
use market_assets::error::AssetError;

#[test]
fn table_keys_round_trip() {
    for key in TableKey::ALL {
        let parsed: TableKey = key.as_str().parse().unwrap();
        assert_eq!(parsed, key);
    }
    assert_eq!(TableKey::WikiPrices.as_str(), "quandl/wiki/prices");
    assert_eq!(TableKey::Sp500Stocks.member_name(), "sp500/stocks.parquet");
}

#[test]
fn unknown_table_key() {
    assert!("quandl/wiki/options".parse::<TableKey>().is_err());
}

#[test]
fn locator_file_name_ignores_query() {
    let url: Locator = "https://algoseek.test/bundles/nasdaq100_min.zip?sig=abc"
        .parse()
        .unwrap();
    assert_eq!(url.file_name(), Some("nasdaq100_min.zip"));
}

#[test]
fn empty_locator_rejected() {
    let err = "  ".parse::<Locator>().unwrap_err();
    assert_matches!(err, AssetError::ConfigParse(_));
}

#[test]
fn archive_sniffing() {
    assert_eq!(ArchiveKind::sniff(b"PK\x03\x04rest"), Some(ArchiveKind::Zip));
    assert_eq!(ArchiveKind::sniff(&[0x1f, 0x8b, 0x08, 0x00]), Some(ArchiveKind::TarGz));
    assert_eq!(ArchiveKind::sniff(b"<htm"), None);
}
