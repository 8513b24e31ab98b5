use cardfilter::*;
use std::sync::Arc;

fn main() -> Result<(), CardFilterError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    // 1. Build the attribute mapping table once
    let table = Arc::new(AttributeMappingTable::carddav_defaults());

    // 2. Populate a mailbox
    let mbox = InMemoryMailbox::with_contacts(vec![
        Contact::new(1, 7).with("fullName", "Alice Liddell").with("email", "alice@example.com"),
        Contact::new(2, 7).with("fullName", "Bob Builder").with("nickname", "Bob").with("homePhone", "555-0100"),
    ]);
    let ctx = DavContext::new("owner@example.com", Some(Arc::new(mbox)));

    // 3. Parse the filter document
    let xml = r#"<C:filter xmlns:C="urn:ietf:params:xml:ns:carddav">
        <C:prop-filter name="EMAIL"><C:text-match>alice</C:text-match></C:prop-filter>
        <C:prop-filter name="NICKNAME"><C:is-not-defined/></C:prop-filter>
    </C:filter>"#;
    let filter = AddressbookFilter::parse(xml, Arc::clone(&table), EvaluatorConfig::default())?;
    println!("Parsed filter: {:#?}", filter.filter());

    // 4. Show the compiled search queries
    let compiler = QueryCompiler::new(table);
    for pf in &filter.filter().prop_filters {
        if let Some(query) = pf.text_match.as_ref().and_then(|tm| compiler.compile_text_match(tm)) {
            println!("{} -> {}", pf.name, query);
        }
    }

    // 5. Evaluate
    for obj in filter.evaluate(&ctx, 7) {
        println!("Matched {} ({:?})", obj.href(), obj.contact().get("fullName"));
    }
    Ok(())
}
