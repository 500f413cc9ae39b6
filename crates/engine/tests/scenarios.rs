use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use formflow_engine::{
    DependencyResolver, DrillDownNavigator, EngineConfig, EngineError, FormEngine, FormMode, FormSchema, FormScope,
    ManualClock, OptionCache, QueryContext, RecordingNotifier, ResolvedValues, ScriptedTransport, WizardStatus,
    WizardStep, build_query, template::referenced_fields,
};
use formflow_types::{
    DependsOn, FieldKind, FieldSchema, FieldValue, FilterCondition, OptionSource, QueryDocument, QueryTemplate,
    ReportDefinition, ReportLevel, ResultSets, StageDefinition, StageLayout, WorkflowDefinition, parse_tag_set,
};
use futures_util::future::join;
use serde_json::json;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 17).expect("date")
}

fn options(values: &[&str]) -> ResultSets {
    ResultSets::new().with_set(
        "rs0",
        values.iter().map(|value| json!({"label": value, "value": value})).collect(),
    )
}

fn select(key: &str, source: &str, depends_on: Option<DependsOn>) -> FieldSchema {
    let mut options = OptionSource::new(QueryTemplate::new(source));
    if let Some(depends_on) = depends_on {
        options = options.depending_on(depends_on);
    }
    FieldSchema::new(FieldKind::SingleSelect { key: key.into(), options })
}

struct Harness {
    resolver: DependencyResolver,
    transport: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let clock = Arc::new(ManualClock::new());
    let cache = OptionCache::with_clock(Duration::from_secs(300), 256, clock.clone());
    let resolver = DependencyResolver::new(cache, transport.clone(), QueryContext::new(today()));
    Harness {
        resolver,
        transport,
        clock,
    }
}

fn state_city_scope() -> FormScope {
    let schema = FormSchema::load(
        "address",
        vec![
            select("State", "qry_state_list", None),
            select("City", "qry_city_list", Some(DependsOn::single("State"))),
        ],
    )
    .expect("schema");
    FormScope::new(Arc::new(schema))
}

#[tokio::test]
async fn emptying_a_parent_empties_the_transitive_closure() {
    let Harness { resolver, transport, .. } = harness();
    for source in ["qry_b", "qry_c", "qry_d"] {
        transport.respond(source, options(&["x"]));
    }
    let schema = FormSchema::load(
        "chain",
        vec![
            FieldSchema::new(FieldKind::Text { key: "A".into() }),
            select("B", "qry_b", Some(DependsOn::single("A"))),
            select("C", "qry_c", Some(DependsOn::single("B"))),
            select("D", "qry_d", Some(DependsOn::multiple(["A", "C"]))),
        ],
    )
    .expect("schema");
    let mut scope = FormScope::new(Arc::new(schema));

    for (key, value) in [("A", "1"), ("B", "x"), ("C", "x"), ("D", "x")] {
        resolver.change(&mut scope, key, value.into()).await.expect("change");
    }
    assert!(["B", "C", "D"].iter().all(|key| scope.options(key).len() == 1));

    resolver.change(&mut scope, "A", FieldValue::Empty).await.expect("clear");
    for key in ["B", "C", "D"] {
        assert!(scope.value(key).is_empty(), "{key} value");
        assert!(scope.options(key).is_empty(), "{key} options");
    }
}

#[tokio::test]
async fn second_identical_fetch_hits_cache_until_expiry() {
    let Harness {
        resolver,
        transport,
        clock,
    } = harness();
    transport.respond("qry_city_list", options(&["Pune"]));
    let mut first = state_city_scope();
    let mut second = state_city_scope();

    resolver.change(&mut first, "State", "MH".into()).await.expect("first");
    resolver.change(&mut second, "State", "MH".into()).await.expect("second");
    assert_eq!(transport.sent_to("qry_city_list").len(), 1);
    assert_eq!(second.options("City").len(), 1);

    clock.advance(Duration::from_secs(300));
    let mut third = state_city_scope();
    resolver.change(&mut third, "State", "MH".into()).await.expect("third");
    assert_eq!(transport.sent_to("qry_city_list").len(), 2);
}

#[tokio::test]
async fn state_change_before_response_keeps_only_latest_options() {
    let Harness { resolver, transport, .. } = harness();
    transport
        .respond_once("qry_city_list", options(&["Pune", "Nagpur"]))
        .respond_once("qry_city_list", options(&["Mysuru"]));
    let mut scope = state_city_scope();

    let mh = resolver.on_field_changed(&mut scope, "State", "MH".into()).expect("MH");
    assert_eq!(mh.len(), 1);
    let mh_fetch = resolver.execute(&mh);

    let ka = resolver.on_field_changed(&mut scope, "State", "KA".into()).expect("KA");
    let (in_flight, latest) = join(mh_fetch, resolver.execute(&ka)).await;

    let sent = transport.sent_to("qry_city_list");
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].condition.as_ref().map(FilterCondition::render).as_deref(),
        Some("<State>MH</State>")
    );

    assert!(resolver.apply(&mut scope, latest).is_empty());
    assert!(resolver.apply(&mut scope, in_flight).is_empty());

    let labels: Vec<_> = scope.options("City").iter().map(|option| option.value.clone()).collect();
    assert_eq!(labels, vec!["Mysuru"]);
}

#[test]
fn date_and_multi_select_formatting() {
    let schema = FormSchema::load(
        "filters",
        vec![
            FieldSchema::new(FieldKind::Date { key: "AsOf".into() }),
            FieldSchema::new(FieldKind::MultiSelect {
                key: "Segments".into(),
                options: OptionSource::new(QueryTemplate::new("qry_segments")),
            }),
            select(
                "Branch",
                "qry_branch",
                Some(DependsOn::multiple(["AsOf", "Segments"])),
            ),
        ],
    )
    .expect("schema");
    let mut scope = FormScope::new(Arc::new(schema));
    scope
        .set_value("AsOf", NaiveDate::from_ymd_opt(2024, 4, 1).expect("date").into())
        .expect("date");
    scope.set_value("Segments", FieldValue::list(["A", "B"])).expect("segments");

    let resolver = harness().resolver;
    let request = resolver.option_request(&scope, "Branch").expect("request").expect("satisfied");
    assert_eq!(
        request.document.multi_condition,
        vec![FilterCondition::new("AsOf", "20240401"), FilterCondition::new("Segments", "A|B")]
    );
}

#[test]
fn rendered_tags_round_trip_referenced_values() {
    let dependency = DependsOn::multiple(["Region", "Owner"])
        .with_filter("RegionCode", "${Region}")
        .with_filter("OwnerName", "${Owner}");
    let values: ResolvedValues = [("Region", "W<1>"), ("Owner", "Smith & Sons"), ("Ignored", "nope")]
        .into_iter()
        .collect();

    let document = build_query(
        &QueryTemplate::new("qry_accounts"),
        Some(&dependency),
        &values,
        &QueryContext::new(today()),
    )
    .expect("document");
    let wire = serde_json::to_string(&document).expect("serialize");
    let decoded: QueryDocument = serde_json::from_str(&wire).expect("deserialize");
    assert_eq!(decoded, document);

    let raw = serde_json::to_value(&document).expect("value");
    let parsed = parse_tag_set(raw["multiCondition"].as_str().expect("tags")).expect("parse");
    for condition in &parsed {
        for field in referenced_fields(&dependency.filter[&condition.tag]) {
            assert_eq!(values.get(&field), Some(condition.value.as_str()));
        }
    }
    assert_eq!(parsed.len(), 2);
    assert!(!wire.contains("nope"));
}

#[test]
fn breadcrumb_zero_clears_context_at_any_depth() {
    let level = |name: &str, key: Option<&str>| ReportLevel {
        name: name.into(),
        title: None,
        query_template: QueryTemplate::new(format!("qry_{name}")),
        primary_key: key.map(str::to_string),
        label_key: None,
    };
    for depth in 1..=3 {
        let mut navigator = DrillDownNavigator::new(ReportDefinition {
            name: "ledger".into(),
            filters: Vec::new(),
            levels: vec![
                level("company", Some("Company")),
                level("account", Some("Account")),
                level("voucher", Some("Voucher")),
                level("line", None),
            ],
        })
        .expect("navigator");
        let keys = ["Company", "Account", "Voucher"];
        for key in keys.iter().take(depth) {
            navigator.drill_into(&json!({ *key: "1" })).expect("drill");
        }
        assert_eq!(navigator.depth(), depth + 1);

        navigator.select_breadcrumb(0).expect("root");
        assert!(navigator.inherited().is_empty());
        assert!(navigator.request(&QueryContext::new(today())).expect("request").multi_condition.is_empty());
    }
}

fn order_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "order".into(),
        stages: vec![
            StageDefinition {
                name: "master".into(),
                title: Some("Order".into()),
                fields: vec![
                    FieldSchema::new(FieldKind::Text { key: "Customer".into() }).mandatory(),
                    FieldSchema::new(FieldKind::Date { key: "OrderDate".into() }),
                ],
                layout: StageLayout::Form,
                submit_template: QueryTemplate::new("qry_order_master").with_context("date", "${OrderDate}"),
            },
            StageDefinition {
                name: "delivery".into(),
                title: None,
                fields: vec![FieldSchema::new(FieldKind::Text { key: "Address".into() }).mandatory()],
                layout: StageLayout::Form,
                submit_template: QueryTemplate::new("qry_order_delivery"),
            },
        ],
        final_submit_template: QueryTemplate::new("qry_order_final"),
    }
}

#[tokio::test]
async fn wizard_blocks_then_requires_final_submit() {
    let transport = Arc::new(ScriptedTransport::new());
    let ok = ResultSets::new().with_set("rs0", vec![json!({"success": true})]);
    for source in ["qry_order_master", "qry_order_delivery", "qry_order_final"] {
        transport.respond(source, ok.clone());
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = FormEngine::with_cache(
        EngineConfig::default(),
        OptionCache::default(),
        transport.clone(),
        notifier.clone(),
        today(),
    );
    let mut wizard = engine.open_workflow(order_workflow()).expect("wizard");

    let blocked = engine.save_stage(&mut wizard).await;
    assert!(matches!(blocked, Err(EngineError::StaticValidationFailure(ref errors)) if errors.contains_key("Customer")));
    assert!(transport.sent().is_empty());

    wizard.active_scope_mut().set_value("Customer", "ACME".into()).expect("set");
    wizard
        .active_scope_mut()
        .set_value("OrderDate", NaiveDate::from_ymd_opt(2024, 4, 1).expect("date").into())
        .expect("set");
    assert_eq!(engine.save_stage(&mut wizard).await, Ok(WizardStep::Advanced { stage: 1 }));
    let master = transport.sent_to("qry_order_master");
    assert_eq!(master[0].ui_context.get("date").map(String::as_str), Some("20240401"));

    wizard.active_scope_mut().set_value("Address", "1 Main St".into()).expect("set");
    assert_eq!(engine.save_stage(&mut wizard).await, Ok(WizardStep::AwaitingFinalSubmit));
    assert_eq!(wizard.status(), WizardStatus::AwaitingFinalSubmit);
    assert!(matches!(
        engine.save_stage(&mut wizard).await,
        Err(EngineError::InvalidTransition(_))
    ));

    engine.final_submit(&mut wizard).await.expect("final");
    assert_eq!(wizard.status(), WizardStatus::Closed);
    assert_eq!(wizard.active_index(), 0);
    assert!(wizard.stages().iter().all(|stage| stage.scope().values().is_blank()));

    let final_document = &transport.sent_to("qry_order_final")[0];
    let payload: serde_json::Value =
        serde_json::from_str(&final_document.ui_context["payload"]).expect("payload");
    assert_eq!(payload["master"]["Customer"], "ACME");
    assert_eq!(payload["delivery"]["Address"], "1 Main St");
    assert_eq!(notifier.errors().len(), 0);
}

#[tokio::test]
async fn options_engine_round_trip_through_facade() {
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .respond("qry_state_list", options(&["MH", "KA"]))
        .respond("qry_city_list", options(&["Pune"]));
    let engine = FormEngine::with_cache(
        EngineConfig::default(),
        OptionCache::default(),
        transport.clone(),
        Arc::new(RecordingNotifier::default()),
        today(),
    );
    let mut scope = engine
        .open_form(
            "address",
            vec![
                select("State", "qry_state_list", None),
                select("City", "qry_city_list", Some(DependsOn::single("State"))),
            ],
            FormMode::New,
        )
        .expect("form");

    assert!(engine.load(&mut scope).await.is_empty());
    assert_eq!(scope.options("State").len(), 2);
    assert!(!scope.is_visible("City"));

    engine.change_value(&mut scope, "State", "MH".into()).await.expect("change");
    assert!(scope.is_visible("City"));
    assert_eq!(scope.options("City")[0].value, "Pune");
}
