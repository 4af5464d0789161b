/// End-to-end tests of computed fields attached to records
use crate::{
    Attributes, ComputedField, ComputedFields, ComputedSpec, EngineConfig, MutationContext, Record,
    SerializeOptions, Topic, Trigger, cascade_depth,
};
use parking_lot::Mutex;
use rstest::rstest;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Shared fixture: the net/gross price pair with optional call counters
#[derive(Default)]
struct Calls {
    get: AtomicUsize,
    set: AtomicUsize,
}

impl Calls {
    fn get(&self) -> usize {
        self.get.load(Ordering::Relaxed)
    }

    fn set(&self) -> usize {
        self.set.load(Ordering::Relaxed)
    }
}

fn gross_price(calls: &Arc<Calls>) -> ComputedField {
    let get_calls = calls.clone();
    let set_calls = calls.clone();
    ComputedField::new("grossPrice")
        .depends(["netPrice", "vatRate"])
        .get(move |fields| {
            get_calls.get.fetch_add(1, Ordering::Relaxed);
            let net = fields.number("netPrice").unwrap_or_default();
            let rate = fields.number("vatRate").unwrap_or_default();
            json!(net * (1.0 + rate / 100.0))
        })
        .set(move |value, fields| {
            set_calls.set.fetch_add(1, Ordering::Relaxed);
            let rate = fields.number("vatRate").unwrap_or_default();
            let gross = value.as_f64().unwrap_or_default();
            fields.set("netPrice", json!(gross / (1.0 + rate / 100.0)));
        })
}

fn price_fields(record: &Record) -> (ComputedFields, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let fields = ComputedFields::new(record, ComputedSpec::new().field(gross_price(&calls)));
    (fields, calls)
}

fn number(record: &Record, name: &str) -> f64 {
    record
        .get(name)
        .and_then(|value| value.as_f64())
        .unwrap_or(f64::NAN)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// Records every change topic raised by the record, in order
fn change_log(record: &Record, attributes: &[&str]) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for attribute in attributes {
        let log = log.clone();
        record.on_change(*attribute, move |event| {
            log.lock().push(event.attribute.to_string());
        });
    }
    log
}

// Distinct topics in the log; nested dispatch makes the raw order depth-first
fn raised(log: &Mutex<Vec<String>>) -> Vec<String> {
    let mut raised = log.lock().clone();
    raised.sort();
    raised.dedup();
    raised
}

fn non_negative_prices(attributes: &Attributes) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    match attributes.get("netPrice").and_then(Value::as_f64) {
        Some(net) if net >= 0.0 => {}
        _ => errors.push("netPrice is invalid".to_string()),
    }
    if let Some(gross) = attributes.get("grossPrice") {
        match gross.as_f64() {
            Some(gross) if gross >= 0.0 => {}
            _ => errors.push("grossPrice is invalid".to_string()),
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[test]
fn initial_value_is_computed_on_construction() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));

    let (fields, calls) = price_fields(&record);

    assert_close(number(&record, "grossPrice"), 120.0);
    assert_eq!(calls.get(), 1);
    assert_eq!(fields.len(), 1);
    assert!(fields.lookup("grossPrice").is_some());
}

#[test]
fn dependency_change_recomputes_before_write_returns() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);

    record.set("vatRate", json!(5)).unwrap();
    assert_close(number(&record, "grossPrice"), 105.0);
    assert_close(number(&record, "netPrice"), 100.0);

    record.set("netPrice", json!(200)).unwrap();
    assert_close(number(&record, "grossPrice"), 210.0);
    assert_close(number(&record, "vatRate"), 5.0);
}

#[test]
fn computed_write_backpropagates_to_dependencies() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);

    record.set("grossPrice", json!(80)).unwrap();

    assert_close(number(&record, "netPrice"), 80.0 / 1.2);
    assert_close(number(&record, "vatRate"), 20.0);
    assert_close(number(&record, "grossPrice"), 80.0);
}

#[rstest]
#[case(0.0, 100.0)]
#[case(5.0, 105.0)]
#[case(20.0, 120.0)]
#[case(50.0, 150.0)]
fn gross_price_follows_vat_rate(#[case] vat_rate: f64, #[case] expected: f64) {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);

    record.set("vatRate", json!(vat_rate)).unwrap();

    assert_close(number(&record, "grossPrice"), expected);
}

#[test]
fn unrelated_attribute_triggers_no_recomputation() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20, "name": "widget" }));
    let (_fields, calls) = price_fields(&record);
    let log = change_log(&record, &["grossPrice"]);

    record.set("name", json!("gadget")).unwrap();

    assert_eq!(calls.get(), 1);
    assert!(log.lock().is_empty());
}

#[test]
fn backpropagation_touches_only_assigned_dependencies() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);
    let log = change_log(&record, &["netPrice", "vatRate"]);

    record.set("grossPrice", json!(60)).unwrap();

    assert_eq!(*log.lock(), vec!["netPrice".to_string()]);
    assert_close(number(&record, "vatRate"), 20.0);
}

#[test]
fn recomputation_never_reruns_setter() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, calls) = price_fields(&record);
    assert_eq!((calls.get(), calls.set()), (1, 0));

    // Dependency write: one recomputation, no back-propagation
    record.set("netPrice", json!(200)).unwrap();
    assert_eq!((calls.get(), calls.set()), (2, 0));

    // Direct write: one setter run, one recomputation of the result
    cov_mark::check!(recomputed_write_not_backpropagated);
    record.set("grossPrice", json!(80)).unwrap();
    assert_eq!((calls.get(), calls.set()), (3, 1));
}

#[test]
fn cascade_settles_within_two_levels() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let deepest = Arc::new(AtomicUsize::new(0));

    let deepest_clone = deepest.clone();
    let field = ComputedField::new("grossPrice")
        .depends(["netPrice", "vatRate"])
        .get(move |fields| {
            deepest_clone.fetch_max(cascade_depth(), Ordering::Relaxed);
            json!(fields.number("netPrice").unwrap_or_default() * 1.2)
        })
        .set(|value, fields| {
            fields.set("netPrice", json!(value.as_f64().unwrap_or_default() / 1.2));
        });
    let _fields = ComputedFields::new(&record, ComputedSpec::new().field(field));
    assert_eq!(deepest.load(Ordering::Relaxed), 1);

    record.set("grossPrice", json!(60)).unwrap();

    assert_eq!(deepest.load(Ordering::Relaxed), 2);
    assert_eq!(cascade_depth(), 0);
}

#[test]
fn dependency_write_raises_dependency_and_computed_events() {
    let record = Record::builder()
        .defaults(json!({ "netPrice": 0.0, "vatRate": 0.0 }))
        .build(json!({ "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);
    let log = change_log(&record, &["netPrice", "vatRate", "grossPrice"]);

    record.set("netPrice", json!(100)).unwrap();

    assert_eq!(raised(&log), vec!["grossPrice", "netPrice"]);

    log.lock().clear();
    record.set("vatRate", json!(5)).unwrap();

    assert_eq!(raised(&log), vec!["grossPrice", "vatRate"]);
}

#[test]
fn computed_write_raises_computed_and_dependency_events() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, _calls) = price_fields(&record);
    let log = change_log(&record, &["netPrice", "vatRate", "grossPrice"]);

    record.set("grossPrice", json!(80)).unwrap();

    assert_eq!(raised(&log), vec!["grossPrice", "netPrice"]);
}

#[test]
fn read_only_field_ignores_direct_writes() {
    let record = Record::new(json!({ "a": 1, "b": 2 }));
    let total = ComputedField::new("total").depends(["a", "b"]).get(|fields| {
        json!(fields.number("a").unwrap_or_default() + fields.number("b").unwrap_or_default())
    });
    let _fields = ComputedFields::new(&record, ComputedSpec::new().field(total));
    let log = change_log(&record, &["a", "b"]);

    cov_mark::check!(read_only_write_ignored);
    record.set("total", json!(99)).unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(record.get("a"), Some(json!(1)));

    record.set("a", json!(5)).unwrap();
    assert_eq!(record.get("total"), Some(json!(7.0)));
}

#[test]
fn rejected_computed_write_leaves_record_untouched() {
    let record = Record::builder()
        .defaults(json!({ "netPrice": 0.0, "vatRate": 0.0 }))
        .validator(non_negative_prices)
        .build(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, calls) = price_fields(&record);
    assert_close(number(&record, "grossPrice"), 120.0);

    let err = record.set("grossPrice", json!("")).unwrap_err();

    assert_eq!(err.to_string(), "record rejected write: grossPrice is invalid");
    assert!(record.is_valid());
    assert_close(number(&record, "grossPrice"), 120.0);
    assert_close(number(&record, "netPrice"), 100.0);
    assert_eq!(calls.set(), 0);
}

#[test]
#[tracing_test::traced_test]
fn rejected_backpropagation_is_logged_and_not_rolled_back() {
    let record = Record::builder()
        .validator(|attributes: &Attributes| {
            match attributes.get("netPrice").and_then(Value::as_f64) {
                Some(net) if net >= 0.0 => Ok(()),
                _ => Err(vec!["netPrice is invalid".to_string()]),
            }
        })
        .build(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, calls) = price_fields(&record);

    record.set("grossPrice", json!(-12)).unwrap();

    assert_eq!(calls.set(), 1);
    assert_eq!(record.get("grossPrice"), Some(json!(-12)));
    assert_close(number(&record, "netPrice"), 100.0);
    assert_eq!(
        record.validation_error(),
        Some(vec!["netPrice is invalid".to_string()])
    );
    assert!(logs_contain("record rejected back-propagated dependencies"));
}

fn quiet_gross_price() -> ComputedField {
    ComputedField::new("grossPrice")
        .depends(["netPrice", "vatRate"])
        .get(|fields| {
            let net = fields.number("netPrice").unwrap_or_default();
            let rate = fields.number("vatRate").unwrap_or_default();
            json!(net * (1.0 + rate / 100.0))
        })
        .quiet(true)
}

fn quiet_record() -> Record {
    Record::builder()
        .defaults(json!({ "netPrice": 0.0, "vatRate": 0.0 }))
        .validator(non_negative_prices)
        .build(json!({ "vatRate": 20 }))
}

#[test]
fn quiet_field_updates_without_notification() {
    let record = quiet_record();
    let _fields = ComputedFields::new(&record, ComputedSpec::new().field(quiet_gross_price()));
    let log = change_log(&record, &["netPrice", "grossPrice"]);
    assert_close(number(&record, "grossPrice"), 0.0);

    record.set("netPrice", json!(100)).unwrap();

    assert_close(number(&record, "grossPrice"), 120.0);
    assert_eq!(*log.lock(), vec!["netPrice".to_string()]);
}

#[test]
fn quiet_update_skips_validation_by_default() {
    let record = quiet_record();
    let _fields = ComputedFields::new(&record, ComputedSpec::new().field(quiet_gross_price()));

    record
        .set_with(
            "netPrice",
            json!(-100),
            &MutationContext::new().validate(false),
        )
        .unwrap();

    assert_close(number(&record, "grossPrice"), -120.0);
    assert!(!record.is_valid());
}

#[test]
fn quiet_update_revalidates_when_configured() {
    let record = quiet_record();
    let config = EngineConfig::new().revalidate_on_quiet_update(true);
    let _fields = ComputedFields::with_config(
        &record,
        ComputedSpec::new().field(quiet_gross_price()),
        config,
    );
    record.set("netPrice", json!(100)).unwrap();
    assert_close(number(&record, "grossPrice"), 120.0);

    record
        .set_with(
            "netPrice",
            json!(-100),
            &MutationContext::new().validate(false),
        )
        .unwrap();

    assert_close(number(&record, "netPrice"), -100.0);
    assert_close(number(&record, "grossPrice"), 120.0);
    assert_eq!(
        record.validation_error(),
        Some(vec![
            "netPrice is invalid".to_string(),
            "grossPrice is invalid".to_string()
        ])
    );
}

#[rstest]
#[case::always(true, 1)]
#[case::only_when_needed(false, 0)]
fn backpropagation_of_reproduced_value(
    #[case] backpropagate_unchanged: bool,
    #[case] setter_runs: usize,
) {
    let record = Record::new(json!({ "value": 1.0 }));
    let setter_calls = Arc::new(AtomicUsize::new(0));

    let setter_calls_clone = setter_calls.clone();
    let doubled = ComputedField::new("doubled")
        .depends(["value"])
        .get(|fields| json!(fields.number("value").unwrap_or_default() * 2.0))
        .set(move |value, fields| {
            setter_calls_clone.fetch_add(1, Ordering::Relaxed);
            fields.set("value", json!(value.as_f64().unwrap_or_default() / 2.0));
        });
    let config = EngineConfig::new().backpropagate_unchanged(backpropagate_unchanged);
    let _fields = ComputedFields::with_config(&record, ComputedSpec::new().field(doubled), config);

    // Silent dependency write: the stored computed value goes stale
    record
        .set_with("value", json!(4.0), &MutationContext::new().silent(true))
        .unwrap();
    assert_eq!(record.get("doubled"), Some(json!(2.0)));

    // The getter already yields 8 for the current dependencies
    record.set("doubled", json!(8.0)).unwrap();

    assert_eq!(setter_calls.load(Ordering::Relaxed), setter_runs);
    assert_eq!(record.get("value"), Some(json!(4.0)));
    assert_eq!(record.get("doubled"), Some(json!(8.0)));
}

#[test]
fn reproduced_value_skip_is_marked() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 25 }));
    let config = EngineConfig::new().backpropagate_unchanged(false);
    let calls = Arc::new(Calls::default());
    let _fields = ComputedFields::with_config(
        &record,
        ComputedSpec::new().field(gross_price(&calls)),
        config,
    );
    record
        .set_with(
            "netPrice",
            json!(48.0),
            &MutationContext::new().silent(true),
        )
        .unwrap();

    cov_mark::check!(unchanged_write_not_backpropagated);
    record.set("grossPrice", json!(60.0)).unwrap();

    assert_eq!(calls.set(), 0);
}

#[test]
fn external_dependency_recomputes_on_trigger() {
    let record = Record::new(json!({ "amount": 10 }));
    let rate = Arc::new(Mutex::new(1.5));
    let trigger: Arc<Mutex<Option<Trigger>>> = Arc::default();

    let trigger_clone = trigger.clone();
    let rate_clone = rate.clone();
    let converted = ComputedField::new("converted")
        .depends(["amount"])
        .depends_on_external(move |fire| *trigger_clone.lock() = Some(fire))
        .get(move |fields| {
            json!(fields.number("amount").unwrap_or_default() * *rate_clone.lock())
        });
    let fields = ComputedFields::new(&record, ComputedSpec::new().field(converted));
    assert_eq!(record.get("converted"), Some(json!(15.0)));

    *rate.lock() = 2.0;
    let fire = trigger.lock().clone().unwrap();
    fire.fire();
    assert_eq!(record.get("converted"), Some(json!(20.0)));

    drop(fields);
    *rate.lock() = 3.0;
    fire.fire();
    assert_eq!(record.get("converted"), Some(json!(20.0)));
}

#[test]
fn dropped_engine_stops_backpropagation() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (fields, calls) = price_fields(&record);

    drop(fields);
    record.set("grossPrice", json!(60)).unwrap();

    assert_eq!(calls.set(), 0);
    assert_close(number(&record, "netPrice"), 100.0);
    assert_eq!(record.listener_count(&Topic::change("netPrice")), 0);
}

#[test]
fn empty_record_computes_on_first_dependency_write() {
    let record = Record::new(json!({}));
    let (_fields, calls) = price_fields(&record);
    assert_eq!(calls.get(), 0);
    assert!(!record.has("grossPrice"));

    record.set("netPrice", json!(100)).unwrap();

    assert_eq!(calls.get(), 1);
    assert_close(number(&record, "grossPrice"), 100.0);
}

#[test]
fn serialization_includes_computed_fields_by_default() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let (fields, _calls) = price_fields(&record);

    let json = fields.to_json(&SerializeOptions::default());

    assert_eq!(
        json.keys().collect::<Vec<_>>(),
        vec!["netPrice", "vatRate", "grossPrice"]
    );
}

#[test]
fn non_serializable_field_needs_explicit_override() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let calls = Arc::new(Calls::default());
    let fields = ComputedFields::new(
        &record,
        ComputedSpec::new().field(gross_price(&calls).serializable(false)),
    );

    let json = fields.to_json(&SerializeOptions::default());
    assert!(!json.contains_key("grossPrice"));
    assert_eq!(json.get("netPrice"), Some(&json!(100)));

    let json = fields.to_json(&SerializeOptions::with_computed());
    assert!(json.contains_key("grossPrice"));

    let to_json = fields.serializer();
    assert!(!to_json(&record, &SerializeOptions::default()).contains_key("grossPrice"));

    // The stored value itself is unaffected
    assert_close(number(&record, "grossPrice"), 120.0);
}

#[test]
fn wrapped_serializer_runs_inner_function_first() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let calls = Arc::new(Calls::default());
    let fields = ComputedFields::new(
        &record,
        ComputedSpec::new().field(gross_price(&calls).serializable(false)),
    );

    let to_json = fields.wrap_serializer(|record: &Record, options: &SerializeOptions| {
        let mut out = record.to_json(options);
        out.remove("vatRate");
        out
    });

    assert_eq!(
        Value::Object(to_json(&record, &SerializeOptions::default())),
        json!({ "netPrice": 100 })
    );
}

#[test]
fn backpropagation_leaves_missing_dependencies_absent() {
    let record = Record::new(json!({ "netPrice": 100 }));
    let (fields, calls) = price_fields(&record);
    let log = change_log(&record, &["netPrice", "vatRate"]);

    record.set("grossPrice", json!(80)).unwrap();

    assert_eq!(*log.lock(), vec!["netPrice".to_string()]);
    assert!(!record.has("vatRate"));
    assert_eq!(calls.get(), 2);
    assert_close(number(&record, "netPrice"), 80.0);
    assert!(!fields.to_json(&SerializeOptions::default()).contains_key("vatRate"));
}

#[test]
fn fields_sharing_a_dependency_recompute_in_declaration_order() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let order = Arc::new(Mutex::new(Vec::new()));

    let gross_order = order.clone();
    let gross = ComputedField::new("grossPrice")
        .depends(["netPrice", "vatRate"])
        .get(move |fields| {
            gross_order.lock().push("grossPrice");
            let net = fields.number("netPrice").unwrap_or_default();
            let rate = fields.number("vatRate").unwrap_or_default();
            json!(net * (1.0 + rate / 100.0))
        });
    let vat_order = order.clone();
    let vat = ComputedField::new("vat")
        .depends(["netPrice", "vatRate"])
        .get(move |fields| {
            vat_order.lock().push("vat");
            let net = fields.number("netPrice").unwrap_or_default();
            let rate = fields.number("vatRate").unwrap_or_default();
            json!(net * rate / 100.0)
        });
    let _fields = ComputedFields::new(&record, ComputedSpec::new().field(gross).field(vat));
    assert_eq!(*order.lock(), vec!["grossPrice", "vat"]);
    order.lock().clear();

    record.set("netPrice", json!(200)).unwrap();

    assert_eq!(*order.lock(), vec!["grossPrice", "vat"]);
    assert_close(number(&record, "grossPrice"), 240.0);
    assert_close(number(&record, "vat"), 40.0);
}

#[test]
fn backpropagation_keeps_write_options() {
    let record = Record::builder()
        .validator(|attributes: &Attributes| {
            match attributes.get("netPrice").and_then(Value::as_f64) {
                Some(net) if net >= 0.0 => Ok(()),
                _ => Err(vec!["netPrice is invalid".to_string()]),
            }
        })
        .build(json!({ "netPrice": 100, "vatRate": 20 }));
    let (_fields, calls) = price_fields(&record);

    record
        .set_with(
            "grossPrice",
            json!(-12),
            &MutationContext::new().validate(false),
        )
        .unwrap();

    assert_eq!(calls.set(), 1);
    assert_close(number(&record, "netPrice"), -10.0);
    assert!(!record.is_valid());
}

#[test]
fn engine_dropped_mid_dispatch_does_not_react() {
    let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
    let slot: Arc<Mutex<Option<ComputedFields>>> = Arc::default();

    // Registered before the engine, so it runs first on change:netPrice
    let slot_clone = slot.clone();
    record.on_change("netPrice", move |_| {
        let fields = slot_clone.lock().take();
        drop(fields);
    });
    let (fields, calls) = price_fields(&record);
    *slot.lock() = Some(fields);

    record.set("netPrice", json!(200)).unwrap();

    assert!(slot.lock().is_none());
    assert_eq!(calls.get(), 1);
    assert_close(number(&record, "grossPrice"), 120.0);
}
