use approx::assert_abs_diff_eq;
use standardize::{
    Column, PredictOptions, ReplayError, StandardizeOptions, StandardizedModel, Table,
    TransformDescriptor, standardize,
};

fn training() -> Table {
    Table::from_columns(vec![
        (
            "rt",
            Column::numeric(vec![
                612.0, 540.5, 701.2, 655.0, 580.3, 598.8, 720.4, 633.1, 566.0, 690.9,
            ]),
        ),
        (
            "freq",
            Column::numeric(vec![12.0, 40.5, 3.2, 8.8, 25.0, 19.4, 1.5, 10.0, 33.3, 4.1]),
        ),
        (
            "exposure",
            Column::numeric(vec![1.0, 2.0, 1.5, 1.0, 3.0, 2.5, 1.0, 2.0, 1.5, 1.0]),
        ),
        (
            "vowel",
            Column::text(&["a", "e", "i", "o", "u", "a", "e", "i", "o", "u"]),
        ),
        (
            "subj",
            Column::text(&["s1", "s2", "s3", "s1", "s2", "s3", "s1", "s2", "s3", "s1"]),
        ),
    ])
    .unwrap()
}

fn fitted() -> StandardizedModel {
    let _ = env_logger::builder().is_test(true).try_init();
    standardize(
        "rt ~ log(freq) + vowel + (1 + log(freq) | subj)",
        &training(),
        &StandardizeOptions::default().with_scale(0.5),
    )
    .unwrap()
}

#[test]
fn prediction_on_training_data_reproduces_the_fit() {
    let model = fitted();
    let data = model.data();

    let all = model.predict(&training(), PredictOptions::all()).unwrap();
    assert_eq!(&all, data);

    let fixed = model.predict(&training(), PredictOptions::fixed_only()).unwrap();
    assert_eq!(fixed.names(), &["log_freq", "vowel"]);
    assert_eq!(fixed, data.select(&["log_freq", "vowel"]).unwrap());

    let random = model.predict(&training(), PredictOptions::random_only()).unwrap();
    assert_eq!(random.names(), &["log_freq", "subj"]);
    assert_eq!(random, data.select(&["log_freq", "subj"]).unwrap());
}

#[test]
fn new_rows_use_training_statistics() {
    let model = fitted();
    let new_data = Table::from_columns(vec![
        ("freq", Column::numeric(vec![12.0, 100.0])),
        ("vowel", Column::text(&["a", "u"])),
        ("subj", Column::text(&["s2", "s1"])),
    ])
    .unwrap();

    let predicted = model.predict(&new_data, PredictOptions::default()).unwrap();
    let training_value = model.data().column("log_freq").unwrap().as_numeric().unwrap()[0];
    let log_freq = predicted.column("log_freq").unwrap().as_numeric().unwrap();
    assert_abs_diff_eq!(log_freq[0], training_value, epsilon = 1e-12);
    assert!(log_freq[1] > log_freq[0]);

    let Column::Factor(vowel) = predicted.column("vowel").unwrap() else {
        panic!("vowel should be coded as a factor");
    };
    assert_eq!(vowel.levels(), &["a", "e", "i", "o", "u"]);
    assert_eq!(vowel.codes(), &[Some(0), Some(4)]);
    assert_eq!(vowel.contrasts(), Some(&model.contrasts()["vowel"]));
}

#[test]
fn unseen_group_is_rejected() {
    let model = fitted();
    let new_data = Table::from_columns(vec![
        ("freq", Column::numeric(vec![5.0, 6.0])),
        ("vowel", Column::text(&["a", "e"])),
        ("subj", Column::text(&["s1", "s9"])),
    ])
    .unwrap();

    assert_eq!(
        model.predict(&new_data, PredictOptions::random_only()),
        Err(ReplayError::UnseenGroup {
            variable: "subj".to_string(),
            group: "s9".to_string()
        })
    );
    // The fixed part alone never looks at the grouping column.
    assert!(model.predict(&new_data, PredictOptions::fixed_only()).is_ok());
}

#[test]
fn unseen_level_is_rejected() {
    let model = fitted();
    let new_data = Table::from_columns(vec![
        ("freq", Column::numeric(vec![5.0])),
        ("vowel", Column::text(&["y"])),
        ("subj", Column::text(&["s1"])),
    ])
    .unwrap();

    assert!(matches!(
        model.predict(&new_data, PredictOptions::fixed_only()),
        Err(ReplayError::UnseenLevel { variable, level, .. }) if variable == "vowel" && level == "y"
    ));
}

#[test]
fn non_positive_values_under_log_are_rejected() {
    let model = fitted();
    let new_data = Table::from_columns(vec![
        ("freq", Column::numeric(vec![0.0])),
        ("vowel", Column::text(&["a"])),
        ("subj", Column::text(&["s1"])),
    ])
    .unwrap();

    assert!(matches!(
        model.predict(&new_data, PredictOptions::fixed_only()),
        Err(ReplayError::NonPositiveLog { .. })
    ));
}

#[test]
fn saved_model_predicts_identically() {
    let model = fitted();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("standardized.toml");
    let path = path.to_str().unwrap();

    model.save(path).unwrap();
    let loaded = StandardizedModel::load(path).unwrap();

    assert_eq!(loaded.formula(), model.formula());
    assert_eq!(loaded.descriptors(), model.descriptors());
    assert_eq!(loaded.contrasts(), model.contrasts());
    assert_eq!(loaded.groups(), model.groups());
    assert_eq!(loaded.data().width(), 0);

    let expected = model.predict(&training(), PredictOptions::all()).unwrap();
    let replayed = loaded.predict(&training(), PredictOptions::all()).unwrap();
    assert_eq!(replayed, expected);
}

#[test]
fn offset_from_options_is_scaled_with_the_response() {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = StandardizeOptions::default().with_offset("exposure");
    let model = standardize("rt ~ freq", &training(), &options).unwrap();

    assert_eq!(model.formula(), "rt ~ freq + offset(offset_exposure)");
    assert_eq!(model.offset().unwrap().name, "offset_exposure");

    let fixed = model.predict(&training(), PredictOptions::fixed_only()).unwrap();
    assert_eq!(fixed.names(), &["freq", "offset_exposure"]);
    assert_eq!(
        fixed.column("offset_exposure").unwrap(),
        model.data().column("offset_exposure").unwrap()
    );
}

fn grouped() -> Table {
    Table::from_columns(vec![
        (
            "y",
            Column::numeric(vec![3.0, 5.5, 4.1, 10.0, 14.0, 12.5, 20.0, 26.0, 23.5]),
        ),
        (
            "x",
            Column::numeric(vec![1.0, 2.0, 1.5, 0.5, 3.0, 2.2, 1.1, 0.9, 2.8]),
        ),
        (
            "e",
            Column::numeric(vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]),
        ),
        (
            "g",
            Column::text(&["g1", "g1", "g1", "g2", "g2", "g2", "g3", "g3", "g3"]),
        ),
    ])
    .unwrap()
}

#[test]
fn grouped_offset_replays_with_response_group_scales() {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = standardize(
        "scale_by(y ~ g) ~ x + offset(e)",
        &grouped(),
        &StandardizeOptions::default(),
    )
    .unwrap();

    let all = model.predict(&grouped(), PredictOptions::all()).unwrap();
    assert_eq!(&all, model.data());

    let TransformDescriptor::GroupedContinuous { scaling, .. } =
        model.descriptor("scale_by_y_g").unwrap()
    else {
        panic!("the response should be scaled per group");
    };

    // New rows without a response: the offset still uses each row's group.
    let new_data = Table::from_columns(vec![
        ("x", Column::numeric(vec![1.0, 1.0])),
        ("e", Column::numeric(vec![4.0, 4.0])),
        ("g", Column::text(&["g3", "g1"])),
    ])
    .unwrap();
    let fixed = model.predict(&new_data, PredictOptions::fixed_only()).unwrap();
    assert_eq!(fixed.names(), &["x", "offset_e"]);
    let offset = fixed.column("offset_e").unwrap().as_numeric().unwrap();
    assert_abs_diff_eq!(offset[0], 4.0 / scaling.groups["g3"].scale, epsilon = 1e-12);
    assert_abs_diff_eq!(offset[1], 4.0 / scaling.groups["g1"].scale, epsilon = 1e-12);
    assert!((offset[0] - offset[1]).abs() > 1e-6);

    let unseen = Table::from_columns(vec![
        ("x", Column::numeric(vec![1.0])),
        ("e", Column::numeric(vec![4.0])),
        ("g", Column::text(&["g7"])),
    ])
    .unwrap();
    assert_eq!(
        model.predict(&unseen, PredictOptions::fixed_only()),
        Err(ReplayError::UnseenGroup {
            variable: "offset(e)".to_string(),
            group: "g7".to_string()
        })
    );
}

#[test]
fn grouped_predictor_rejects_unseen_group() {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = standardize("y ~ scale_by(x ~ g)", &grouped(), &StandardizeOptions::default())
        .unwrap();

    let new_data = Table::from_columns(vec![
        ("x", Column::numeric(vec![1.0, 2.0])),
        ("g", Column::text(&["g2", "g9"])),
    ])
    .unwrap();
    assert_eq!(
        model.predict(&new_data, PredictOptions::default()),
        Err(ReplayError::UnseenGroup {
            variable: "scale_by(x ~ g)".to_string(),
            group: "g9".to_string()
        })
    );

    let seen = Table::from_columns(vec![
        ("x", Column::numeric(vec![1.0, 2.0])),
        ("g", Column::text(&["g2", "g3"])),
    ])
    .unwrap();
    let predicted = model.predict(&seen, PredictOptions::default()).unwrap();
    assert_eq!(predicted.names(), &["scale_by_x_g"]);
}
