#[cfg(test)]
mod tests {
    use crate::class::AbstractFactory;
    use crate::config::NamespaceSettings;
    use crate::dom;
    use crate::error::ErrorKind;
    use crate::events::{Event, EventClass};
    use crate::instance::Instance;
    use crate::namespace::{ClassBindings, Namespace};
    use crate::scheduler::WriteScheduler;
    use crate::value::Value;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::time::Duration;

    fn namespace() -> Namespace {
        Namespace::with_scheduler(
            NamespaceSettings::default(),
            Rc::new(WriteScheduler::new(Duration::from_secs(60))),
        )
    }

    fn load(html: &str) -> Namespace {
        load_with(html, &ClassBindings::new())
    }

    fn load_with(html: &str, bindings: &ClassBindings) -> Namespace {
        let ns = namespace();
        ns.load_document(html, bindings).unwrap();
        ns
    }

    fn construct(ns: &Namespace, class: &str) -> Instance {
        ns.class(class).unwrap().construct(None).unwrap()
    }

    fn html(instance: &Instance) -> String {
        instance.outer_html().unwrap()
    }

    const COUNTER: &str = r#"
        <template ooml-class="Counter">
            <div><span>{{ natural this.count }}</span><em>{{ string|null this.label }}</em></div>
        </template>
    "#;

    const LISTS: &str = r#"
        <template ooml-class="Item"><li>{{ string this.label }}</li></template>
        <template ooml-class="List"><ul>{ for Item of this.items }</ul></template>
        <template ooml-class="Other"><ol>{ for Item of this.entries }</ol></template>
        <template ooml-class="Card"><section><header>{ Item this.title }</header></section></template>
    "#;

    fn item(ns: &Namespace, label: &str) -> Instance {
        ns.class("Item")
            .unwrap()
            .construct(Some(Value::from(json!({ "label": label }))))
            .unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Primitive properties
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_primitive_write_reads_back_and_renders() {
        let ns = load(COUNTER);
        let counter = construct(&ns, "Counter");

        assert_eq!(counter.get("count").unwrap(), Value::from(0));
        assert_eq!(counter.get("label").unwrap(), Value::Null);
        assert_eq!(html(&counter), "<div><span>0</span><em></em></div>");

        counter.set("count", 5).unwrap();
        counter.set("label", "five & <more>").unwrap();
        assert_eq!(counter.get("count").unwrap(), Value::from(5));
        assert_eq!(counter.get("label").unwrap(), Value::from("five & <more>"));
        assert_eq!(
            html(&counter),
            "<div><span>5</span><em>five &amp; &lt;more&gt;</em></div>"
        );
    }

    #[test]
    fn test_rejected_write_keeps_previous_value() {
        let ns = load(COUNTER);
        let counter = construct(&ns, "Counter");
        counter.set("count", 7).unwrap();

        for bad in [Value::from(-1), Value::from(1.5), Value::from("7"), Value::Null] {
            let err = counter.set("count", bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Type);
        }
        let err = counter.set("label", Value::Array(vec![])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);

        assert_eq!(counter.get("count").unwrap(), Value::from(7));
        assert_eq!(html(&counter), "<div><span>7</span><em></em></div>");
    }

    #[test]
    fn test_unknown_names() {
        let ns = load(COUNTER);
        let counter = construct(&ns, "Counter");
        assert_eq!(counter.get("missing").unwrap_err().kind(), ErrorKind::Reference);
        assert_eq!(
            counter.set("missing", 1).unwrap_err().kind(),
            ErrorKind::Reference
        );

        // Bulk assignment checks every key before writing any
        let err = counter
            .assign(Value::from(json!({ "count": 3, "missing": 1 })))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reference);
        assert_eq!(counter.get("count").unwrap(), Value::from(0));

        let err = ns
            .class("Counter")
            .unwrap()
            .construct(Some(Value::from(json!({ "nope": true }))))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reference);
    }

    #[test]
    fn test_values_in_declaration_order() {
        let ns = load(COUNTER);
        let counter = ns
            .class("Counter")
            .unwrap()
            .construct_from_json(r#"{ "label": "x", "count": 2 }"#)
            .unwrap();
        assert_eq!(counter.values(), vec![Value::from(2), Value::from("x")]);
        assert_eq!(
            ns.class("Counter").unwrap().property_names(),
            vec!["count".to_string(), "label".to_string()]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Dynamic bindings
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_dependent_bindings_update_synchronously() {
        let ns = load(
            r#"<template ooml-class="Person">
                <ooml-property name="first" type="string">"Ada"</ooml-property>
                <ooml-property name="last" type="string">"Lovelace"</ooml-property>
                <ooml-property name="full" binding="{{ this.first }} {{ this.last }}"></ooml-property>
                <ooml-property name="greeting" binding="Hello, {{ this.full }}"></ooml-property>
                <div><h1>{{ this.full }}</h1><p>{{ this.greeting }}</p></div>
            </template>"#,
        );
        let person = construct(&ns, "Person");
        assert_eq!(person.get("full").unwrap(), Value::from("Ada Lovelace"));
        assert_eq!(
            html(&person),
            "<div><h1>Ada Lovelace</h1><p>Hello, Ada Lovelace</p></div>"
        );

        person.set("first", "Augusta").unwrap();
        assert_eq!(
            html(&person),
            "<div><h1>Augusta Lovelace</h1><p>Hello, Augusta Lovelace</p></div>"
        );
        assert_eq!(
            person.get("greeting").unwrap(),
            Value::from("Hello, Augusta Lovelace")
        );
    }

    #[test]
    fn test_binding_reads_later_declared_binding() {
        // `joined` reads `word` directly and through `shout`
        let ns = load(
            r#"<template ooml-class="Echo">
                <ooml-property name="word" type="string">""</ooml-property>
                <ooml-property name="joined" binding="{{ this.word }}-{{ this.shout }}"></ooml-property>
                <ooml-property name="shout" binding="{{ this.word }}!"></ooml-property>
                <div>{{ this.word }}|{{ this.shout }}|{{ this.joined }}</div>
            </template>"#,
        );
        let echo = construct(&ns, "Echo");
        assert_eq!(echo.get("joined").unwrap(), Value::from("-!"));

        echo.set("word", "x").unwrap();
        assert_eq!(echo.get("shout").unwrap(), Value::from("x!"));
        assert_eq!(echo.get("joined").unwrap(), Value::from("x-x!"));
        assert_eq!(html(&echo), "<div>x|x!|x-x!</div>");

        let seeded = ns
            .class("Echo")
            .unwrap()
            .construct(Some(Value::from(json!({ "word": "hi" }))))
            .unwrap();
        assert_eq!(html(&seeded), "<div>hi|hi!|hi-hi!</div>");
    }

    #[test]
    fn test_whitespace_between_inline_elements_is_kept() {
        let ns = load(
            r#"<template ooml-class="Pair">
                <p><b>{{ this.left }}</b> <i>{{ this.right }}</i></p>
            </template>"#,
        );
        let pair = ns
            .class("Pair")
            .unwrap()
            .construct(Some(Value::from(json!({ "left": "hello", "right": "world" }))))
            .unwrap();
        assert_eq!(html(&pair), "<p><b>hello</b> <i>world</i></p>");
        assert_eq!(dom::text_content(&pair.root().unwrap()), "hello world");
    }

    #[test]
    fn test_mutation_events() {
        let ns = load(COUNTER);
        let counter = construct(&ns, "Counter");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        counter.on(EventClass::Mutation, "propertyvaluechange", move |_, event| {
            if let Event::Mutation(m) = event {
                log.borrow_mut()
                    .push((m.property.clone(), m.old_value.clone(), m.new_value.clone()));
            }
            Ok(())
        });

        counter.set("count", 4).unwrap();
        let _ = counter.set("count", -4);
        assert_eq!(
            *seen.borrow(),
            vec![("count".to_string(), Value::from(0), Value::from(4))]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Collections and attachment
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_collection_follows_sequence_order() {
        let ns = load(LISTS);
        let list = construct(&ns, "List");
        let other = construct(&ns, "Other");
        let (a, b, c) = (item(&ns, "a"), item(&ns, "b"), item(&ns, "c"));

        list.set("items", vec![a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(
            html(&list),
            "<ul><!----><li>a</li><li>b</li><li>c</li></ul>"
        );
        assert!(a.is_attached() && b.is_attached() && c.is_attached());

        let items = list.get("items").unwrap().as_collection().cloned().unwrap();
        let removed = items.remove(1).unwrap();
        assert_eq!(removed, b);
        assert!(!b.is_attached());
        assert_eq!(html(&list), "<ul><!----><li>a</li><li>c</li></ul>");

        let entries = other.get("entries").unwrap().as_collection().cloned().unwrap();
        entries.push(b.clone()).unwrap();
        assert_eq!(html(&other), "<ol><!----><li>b</li></ol>");

        // Already attached elsewhere
        assert_eq!(entries.push(a.clone()).unwrap_err().kind(), ErrorKind::Reference);
        assert_eq!(html(&list), "<ul><!----><li>a</li><li>c</li></ul>");
    }

    #[test]
    fn test_collection_edits() {
        let ns = load(LISTS);
        let list = construct(&ns, "List");
        let items = list.get("items").unwrap().as_collection().cloned().unwrap();

        items
            .initialize(vec![
                Value::from(json!({ "label": "one" })),
                Value::from(json!({ "label": "two" })),
            ])
            .unwrap();
        items.unshift(item(&ns, "zero")).unwrap();
        items.insert(3, item(&ns, "three")).unwrap();
        assert_eq!(
            html(&list),
            "<ul><!----><li>zero</li><li>one</li><li>two</li><li>three</li></ul>"
        );

        items.move_item(0, 3).unwrap();
        assert_eq!(
            html(&list),
            "<ul><!----><li>one</li><li>two</li><li>three</li><li>zero</li></ul>"
        );

        let last = items.pop().unwrap().unwrap();
        assert_eq!(last.get("label").unwrap(), Value::from("zero"));
        let first = items.shift().unwrap().unwrap();
        assert_eq!(first.get("label").unwrap(), Value::from("one"));
        assert_eq!(items.len(), 2);

        assert_eq!(
            items.insert(5, item(&ns, "x")).unwrap_err().kind(),
            ErrorKind::Range
        );
        assert_eq!(items.remove(2).unwrap_err().kind(), ErrorKind::Range);

        // The same instance cannot appear twice
        let dup = item(&ns, "dup");
        let err = items
            .splice(0, 0, vec![Value::from(dup.clone()), Value::from(dup.clone())])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reference);
        assert!(!dup.is_attached());
        assert_eq!(items.len(), 2);

        // Removed instances may be reinserted by the same splice
        let kept = items.get(0).unwrap();
        items.splice(0, 2, vec![Value::from(kept.clone())]).unwrap();
        assert_eq!(html(&list), "<ul><!----><li>two</li></ul>");
        assert!(kept.is_attached());

        assert_eq!(
            list.set("items", "nope").unwrap_err().kind(),
            ErrorKind::Type
        );
    }

    #[test]
    fn test_collection_json() {
        let ns = load(LISTS);
        let list = ns
            .class("List")
            .unwrap()
            .construct(Some(Value::from(json!({
                "items": [{ "label": "a" }, { "label": "b" }, { "label": "c" }]
            }))))
            .unwrap();
        let items = list.get("items").unwrap().as_collection().cloned().unwrap();

        assert_eq!(
            items.to_json(Some(1), None, 0).unwrap(),
            r#"[{"label":"b"},{"label":"c"}]"#
        );
        assert_eq!(
            items.to_json(None, Some(1), 2).unwrap(),
            "[\n  {\n    \"label\": \"a\"\n  }\n]"
        );
        assert_eq!(items.to_json(None, None, 11).unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(items.to_array(Some(5), None), Vec::<serde_json::Value>::new());
    }

    #[test]
    fn test_attach_and_detach_invariants() {
        let ns = load(LISTS);
        let list = construct(&ns, "List");
        let card = construct(&ns, "Card");
        let free = item(&ns, "free");

        assert_eq!(free.detach().unwrap_err().kind(), ErrorKind::Reference);

        card.set("title", free.clone()).unwrap();
        assert!(free.is_attached());
        assert_eq!(
            html(&card),
            "<section><header><!----><li>free</li></header></section>"
        );
        // Assigning the current value again changes nothing
        card.set("title", free.clone()).unwrap();

        assert_eq!(
            free.attach(&list, "items").unwrap_err().kind(),
            ErrorKind::Reference
        );

        free.detach().unwrap();
        assert!(!free.is_attached());
        assert_eq!(card.get("title").unwrap(), Value::Null);
        assert_eq!(html(&card), "<section><header><!----></header></section>");
        assert!(!dom::has_parent(&free.root().unwrap()));

        free.attach(&list, "items").unwrap();
        free.detach().unwrap();
        let items = list.get("items").unwrap().as_collection().cloned().unwrap();
        assert!(items.is_empty());
        assert_eq!(html(&list), "<ul><!----></ul>");
    }

    #[test]
    fn test_element_slot_replacement() {
        let ns = load(LISTS);
        let card = construct(&ns, "Card");
        let first = item(&ns, "first");
        let second = item(&ns, "second");

        card.set("title", first.clone()).unwrap();
        card.set("title", second.clone()).unwrap();
        assert!(!first.is_attached());
        assert!(second.is_attached());
        assert_eq!(
            html(&card),
            "<section><header><!----><li>second</li></header></section>"
        );

        // A failed attach leaves the current child in place
        let list = construct(&ns, "List");
        list.set("items", vec![first.clone()]).unwrap();
        assert_eq!(card.set("title", first).unwrap_err().kind(), ErrorKind::Reference);
        assert_eq!(card.get("title").unwrap(), Value::from(second));

        // Plain objects construct a new element; other shapes are rejected
        card.set("title", json!({ "label": "made" })).unwrap();
        assert_eq!(
            html(&card),
            "<section><header><!----><li>made</li></header></section>"
        );
        assert_eq!(card.set("title", 3).unwrap_err().kind(), ErrorKind::Type);
        let other = construct(&ns, "Other");
        assert_eq!(card.set("title", other).unwrap_err().kind(), ErrorKind::Type);
    }

    #[test]
    fn test_cannot_attach_inside_itself() {
        let ns = load(r#"<template ooml-class="Box"><div>{ Element this.child }</div></template>"#);
        let outer = construct(&ns, "Box");
        let inner = construct(&ns, "Box");

        assert_eq!(
            outer.set("child", outer.clone()).unwrap_err().kind(),
            ErrorKind::Reference
        );
        outer.set("child", inner.clone()).unwrap();
        assert_eq!(
            inner.set("child", outer.clone()).unwrap_err().kind(),
            ErrorKind::Reference
        );
        assert_eq!(html(&outer), "<div><!----><div><!----></div></div>");
    }

    #[test]
    fn test_children_become_free_when_parent_is_dropped() {
        let ns = load(LISTS);
        let title = item(&ns, "title");
        let entry = item(&ns, "entry");
        {
            let card = construct(&ns, "Card");
            let list = construct(&ns, "List");
            card.set("title", title.clone()).unwrap();
            list.set("items", vec![entry.clone()]).unwrap();
            assert!(title.is_attached() && entry.is_attached());
        }

        for child in [&title, &entry] {
            assert!(!child.is_attached());
            assert!(!dom::has_parent(&child.root().unwrap()));
            assert_eq!(child.detach().unwrap_err().kind(), ErrorKind::Reference);
        }

        let other = construct(&ns, "Other");
        let entries = other.get("entries").unwrap().as_collection().cloned().unwrap();
        entries.push(title.clone()).unwrap();
        entries.push(entry.clone()).unwrap();
        assert_eq!(html(&other), "<ol><!----><li>title</li><li>entry</li></ol>");
    }

    #[test]
    fn test_collection_handle_outliving_its_owner_is_emptied() {
        let ns = load(LISTS);
        let entry = item(&ns, "kept");
        let items = {
            let list = construct(&ns, "List");
            list.set("items", vec![entry.clone()]).unwrap();
            list.get("items").unwrap().as_collection().cloned().unwrap()
        };
        assert!(items.owner().is_none());
        assert!(items.is_empty());
        assert!(!entry.is_attached());
        assert_eq!(html(&entry), "<li>kept</li>");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Deferred attribute writes
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_formatted_attribute_writes_coalesce() {
        let ns = load(
            r#"<template ooml-class="Button">
                <ooml-attribute name="size" type="string">"md"</ooml-attribute>
                <button class="btn btn-{{ this.kind }} btn-{{ this.attributes.size }}">{{ this.kind }}</button>
            </template>"#,
        );
        let scheduler = Rc::clone(ns.scheduler());
        let button = construct(&ns, "Button");
        let root = button.root().unwrap();
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(dom::get_attribute(&root, "class").as_deref(), Some("btn btn- btn-md"));

        let flushes = scheduler.flush_count();
        button.set("kind", "primary").unwrap();
        button.set_attribute("size", "lg").unwrap();
        button.set("kind", "danger").unwrap();

        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(dom::get_attribute(&root, "class").as_deref(), Some("btn btn- btn-md"));
        // Text and the data mirror are written immediately
        assert_eq!(dom::text_content(&root), "danger");
        assert_eq!(dom::get_attribute(&root, "data-size").as_deref(), Some("lg"));

        assert_eq!(scheduler.flush_now(), 1);
        assert_eq!(scheduler.flush_count(), flushes + 1);
        assert_eq!(
            dom::get_attribute(&root, "class").as_deref(),
            Some("btn btn-danger btn-lg")
        );

        assert_eq!(
            button.set_attribute("size", 3).unwrap_err().kind(),
            ErrorKind::Type
        );
        assert_eq!(
            button.set_attribute("colour", "red").unwrap_err().kind(),
            ErrorKind::Reference
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_abstract_construction() {
        let ns = load(
            r#"<template ooml-abstract-class="Shape">
                <ooml-property name="sides" type="natural">0</ooml-property>
            </template>
            <template ooml-class="Square extends Shape"><div>{{ this.sides }}</div></template>
            <template ooml-class="Unrelated"><div></div></template>"#,
        );
        let shape = ns.class("Shape").unwrap();
        let square = ns.class("Square").unwrap();
        let unrelated = ns.class("Unrelated").unwrap();

        assert_eq!(shape.construct(None).unwrap_err().kind(), ErrorKind::Type);

        let wrong: AbstractFactory = Rc::new(move |_: Option<&Value>| unrelated.construct(None));
        assert_eq!(
            shape.construct_with(&wrong, None).unwrap_err().kind(),
            ErrorKind::Type
        );

        let made = square
            .construct(Some(Value::from(json!({ "sides": 4 }))))
            .unwrap();
        let handed_out = made.clone();
        let factory: AbstractFactory = Rc::new(move |_: Option<&Value>| Ok(handed_out.clone()));
        let built = shape.construct_with(&factory, None).unwrap();
        assert_eq!(built, made);
        assert!(built.class().is_a(&shape));
        assert_eq!(html(&built), "<div>4</div>");
    }

    #[test]
    fn test_failed_construction_frees_children() {
        let ns = load(&format!(
            "{}{}",
            LISTS,
            r#"<template ooml-class="Badge"><p>{ Item this.title }{ for Item of this.extra }<b>{{ natural this.n }}</b></p></template>"#
        ));
        let title = item(&ns, "title");
        let extra = item(&ns, "extra");
        let init: BTreeMap<String, Value> = [
            ("title".to_string(), Value::from(title.clone())),
            ("extra".to_string(), Value::from(vec![extra.clone()])),
            ("n".to_string(), Value::from(-1)),
        ]
        .into_iter()
        .collect();

        let err = ns
            .class("Badge")
            .unwrap()
            .construct(Some(Value::Object(init)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        for child in [&title, &extra] {
            assert!(!child.is_attached());
            assert!(!dom::has_parent(&child.root().unwrap()));
        }

        let card = construct(&ns, "Card");
        card.set("title", title).unwrap();
        assert_eq!(
            html(&card),
            "<section><header><!----><li>title</li></header></section>"
        );
    }

    #[test]
    fn test_constructor_chain_and_view_composition() {
        let bindings = ClassBindings::new()
            .constructor("Base", |instance, parent| {
                parent.call(instance)?;
                instance.set("title", "base")
            })
            .constructor("Post", |instance, parent| {
                parent.call(instance)?;
                let title = instance.get("title")?;
                instance.set("body", format!("after {}", title.to_output_text()))
            });
        let ns = load_with(
            r#"<template ooml-class="Base">
                <article><h2>{{ string this.title }}</h2><ooml-extension-point></ooml-extension-point></article>
            </template>
            <template ooml-class="Post extends Base"><p>{{ string this.body }}</p></template>"#,
            &bindings,
        );

        let post = construct(&ns, "Post");
        assert_eq!(
            html(&post),
            "<article><h2>base</h2><p>after base</p></article>"
        );
        assert_eq!(
            post.class().property_names(),
            vec!["title".to_string(), "body".to_string()]
        );
        assert!(ns.class("Post").unwrap().constructor().is_some());
    }

    #[test]
    fn test_passthrough_merges_into_default() {
        let ns = load(
            r#"<template ooml-class="Field">
                <ooml-property name="value" type="string">""</ooml-property>
                <ooml-property name="placeholder" type="string">"none"</ooml-property>
                <label>{{ this.value }}|{{ this.placeholder }}</label>
            </template>
            <template ooml-class="Form">
                <ooml-property name="name" passthrough="value">{ "placeholder": "Your name" }</ooml-property>
                <form>{ Field this.name }</form>
            </template>"#,
        );
        let form = ns
            .class("Form")
            .unwrap()
            .construct(Some(Value::from(json!({ "name": "Ada" }))))
            .unwrap();
        assert_eq!(
            html(&form),
            "<form><!----><label>Ada|Your name</label></form>"
        );

        let blank = construct(&ns, "Form");
        assert_eq!(html(&blank), "<form><!----><label>|Your name</label></form>");
        // The shared default object was not modified
        assert_eq!(
            ns.class("Form").unwrap().predefined_properties().get("name"),
            Some(&Value::from(json!({ "placeholder": "Your name" })))
        );
    }

    #[test]
    fn test_object_round_trip() {
        let ns = load(&format!(
            "{}{}",
            LISTS,
            r#"<template ooml-class="Profile">
                <ooml-property name="age" type="natural|null"></ooml-property>
                <ooml-property name="active" type="boolean">true</ooml-property>
                <div><b>{{ string this.name }}</b>{ for Item of this.links }</div>
            </template>"#
        ));
        let profile = ns
            .class("Profile")
            .unwrap()
            .construct(Some(Value::from(json!({
                "name": "Ada",
                "age": 36,
                "links": [{ "label": "home" }, { "label": "blog" }]
            }))))
            .unwrap();
        let projected = profile.to_object();
        assert_eq!(
            projected,
            json!({
                "age": 36,
                "active": true,
                "name": "Ada",
                "links": [{ "label": "home" }, { "label": "blog" }]
            })
        );

        let copy = construct(&ns, "Profile");
        copy.assign(Value::from(projected.clone())).unwrap();
        assert_eq!(copy.to_object(), projected);
        assert_eq!(copy.to_json().unwrap(), profile.to_json().unwrap());
        assert_eq!(html(&copy), html(&profile));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_dispatch_bubbles_to_child_handler() {
        let picked = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&picked);
        let bindings = ClassBindings::new().method("List", "onPicked", move |ctx| {
            log.borrow_mut().push(ctx.payload.clone());
            Ok(Value::Null)
        });
        let ns = load_with(
            r#"<template ooml-class="Item">
                <li domonclick="dispatch('Picked', event)">{{ string this.label }}</li>
            </template>
            <template ooml-class="List"><ul childonpicked="onPicked">{ for Item of this.items }</ul></template>"#,
            &bindings,
        );
        let list = construct(&ns, "List");
        let first = item(&ns, "first");
        let second = item(&ns, "second");
        list.set("items", vec![first.clone(), second.clone()]).unwrap();

        assert!(first
            .handle_dom_event(&first.root().unwrap(), "click", Value::from(1))
            .unwrap());

        second.on(EventClass::Dispatch, "picked", |_, event| {
            if let Event::Dispatch(d) = event {
                d.prevent_default();
            }
            Ok(())
        });
        second
            .handle_dom_event(&second.root().unwrap(), "click", Value::from(2))
            .unwrap();

        // Nothing bubbles from a free instance
        let free = item(&ns, "free");
        free.dispatch("picked", Value::from(3)).unwrap();

        assert_eq!(*picked.borrow(), vec![Value::from(1)]);
        assert!(!first
            .handle_dom_event(&first.root().unwrap(), "keydown", Value::Null)
            .unwrap());
    }

    #[test]
    fn test_method_returning_false_stops_handler() {
        let picked = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&picked);
        let bindings = ClassBindings::new()
            .method("Item", "allowed", |ctx| Ok(Value::Bool(*ctx.payload != Value::from(2))))
            .method("List", "onPicked", move |ctx| {
                log.borrow_mut().push(ctx.payload.clone());
                Ok(Value::Null)
            });
        let ns = load_with(
            r#"<template ooml-class="Item">
                <li domonclick="this.allowed(); dispatch('Picked', event)">{{ string this.label }}</li>
            </template>
            <template ooml-class="List"><ul childonpicked="onPicked">{ for Item of this.items }</ul></template>"#,
            &bindings,
        );
        let list = construct(&ns, "List");
        let entry = item(&ns, "entry");
        list.set("items", vec![entry.clone()]).unwrap();

        let root = entry.root().unwrap();
        assert!(entry.handle_dom_event(&root, "click", Value::from(1)).unwrap());
        assert!(entry.handle_dom_event(&root, "click", Value::from(2)).unwrap());
        assert!(entry.handle_dom_event(&root, "click", Value::from(3)).unwrap());
        assert_eq!(*picked.borrow(), vec![Value::from(1), Value::from(3)]);
    }

    #[test]
    fn test_exposed_nodes_and_trigger() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&calls);
        let bindings = ClassBindings::new().method("Search", "submit", move |ctx| {
            log.borrow_mut().push(ctx.node.is_some());
            ctx.instance.set("query", "sent")?;
            Ok(Value::Bool(false))
        });
        let ns = load_with(
            r#"<template ooml-class="Search">
                <form><input ooml-expose="field" ooml-style="width: 1px" value="{{ string this.query }}"><button ooml-expose="go" domonclick="this.submit()">Go</button></form>
            </template>"#,
            &bindings,
        );
        let search = construct(&ns, "Search");
        let field = search.exposed("field").unwrap();
        assert_eq!(dom::get_attribute(&field, "style").as_deref(), Some("width: 1px"));
        assert!(search.exposed("missing").is_none());

        assert!(search.trigger("go", "click", Value::Null).unwrap());
        assert_eq!(*calls.borrow(), vec![true]);
        assert_eq!(search.get("query").unwrap(), Value::from("sent"));
        assert_eq!(
            search.trigger("nope", "click", Value::Null).unwrap_err().kind(),
            ErrorKind::Reference
        );

        assert_eq!(search.call("submit", Value::Null).unwrap(), Value::Bool(false));
        assert_eq!(*calls.borrow(), vec![true, false]);
        assert_eq!(
            search.call("reset", Value::Null).unwrap_err().kind(),
            ErrorKind::Reference
        );
    }
}
