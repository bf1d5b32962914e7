use assert_matches::assert_matches;

use kira_geo_cache::classify::classify;
use kira_geo_cache::domain::DataStatus;
use kira_geo_cache::error::KiraError;

#[test]
fn idat_pair() {
    let text = "!Sample_supplementary_file = ftp://x/GSM1_Grn.idat.gz
!Sample_supplementary_file = ftp://x/GSM1_Red.idat.gz
!Sample_data_row_count = 0
";
    assert_eq!(classify(text).unwrap(), DataStatus::IdatPair);
}

#[test]
fn pair_without_idat_first_has_no_data() {
    let text = "!Sample_supplementary_file = ftp://x/GSM1.txt.gz
!Sample_supplementary_file = ftp://x/GSM1_Red.idat.gz
!Sample_data_row_count = 10
";
    assert_eq!(classify(text).unwrap(), DataStatus::None);
}

#[test]
fn none_sentinel_with_rows_is_on_page() {
    let text = "!Sample_supplementary_file = NONE\n!Sample_data_row_count = 485577\n";
    assert_eq!(classify(text).unwrap(), DataStatus::OnPage);
}

#[test]
fn single_green_file_with_rows_is_on_page() {
    let text = "!Sample_supplementary_file = ftp://x/GSM1_Grn.idat.gz\n!Sample_data_row_count = 3\n";
    assert_eq!(classify(text).unwrap(), DataStatus::OnPage);
}

#[test]
fn single_red_file_has_no_data() {
    let text = "!Sample_supplementary_file = ftp://x/GSM1_Red.idat.gz\n!Sample_data_row_count = 3\n";
    assert_eq!(classify(text).unwrap(), DataStatus::None);
}

#[test]
fn no_supplementary_entries_has_no_data() {
    assert_eq!(
        classify("!Sample_title = x\n!Sample_data_row_count = 5\n").unwrap(),
        DataStatus::None
    );
}

#[test]
fn three_entries_have_no_data() {
    let text = "!Sample_supplementary_file = ftp://x/a.idat
!Sample_supplementary_file = ftp://x/b.idat
!Sample_supplementary_file = ftp://x/c.idat
!Sample_data_row_count = 5
";
    assert_eq!(classify(text).unwrap(), DataStatus::None);
}

#[test]
fn missing_row_count_is_a_parse_error() {
    let err = classify("!Sample_supplementary_file = NONE\n").unwrap_err();
    assert_matches!(err, KiraError::Parse(_));
}

#[test]
fn non_numeric_row_count_has_no_data() {
    let text = "!Sample_supplementary_file = NONE\n!Sample_data_row_count = many\n";
    assert_eq!(classify(text).unwrap(), DataStatus::None);
}
