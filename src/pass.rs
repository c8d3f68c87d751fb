use anyhow::{Context, Result};
use log::{debug, info};
use rayon::prelude::*;

use crate::ir::{ClassFile, ConstantPool, Method};
use crate::jar::Entry;
use crate::nest::strip_nest_attributes;
use crate::neutralize::neutralize_method;
use crate::parse::parse_class;
use crate::skip::{SkipList, strip_method_bodies};
use crate::write::class_to_bytes;

/// What the pass did to one class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ClassOutcome {
    pub(crate) path: String,
    pub(crate) class_name: String,
    pub(crate) skipped: bool,
    pub(crate) rewritten_call_sites: usize,
    pub(crate) removed_bodies: usize,
    pub(crate) stripped_attributes: usize,
}

/// Rewritten entries in input order plus one outcome per class entry.
#[derive(Debug, Default)]
pub(crate) struct PassOutput {
    pub(crate) entries: Vec<Entry>,
    pub(crate) classes: Vec<ClassOutcome>,
}

/// Desugar every class entry of a container. Entries are processed in
/// parallel and collected back in their original order; directories and
/// resources pass through untouched.
pub(crate) fn desugar_entries(entries: Vec<Entry>, skip_list: &SkipList) -> Result<PassOutput> {
    let results = entries
        .into_par_iter()
        .map(|entry| desugar_entry(entry, skip_list))
        .collect::<Result<Vec<_>>>()?;

    let mut output = PassOutput::default();
    for (entry, outcome) in results {
        output.entries.push(entry);
        output.classes.extend(outcome);
    }
    Ok(output)
}

fn desugar_entry(mut entry: Entry, skip_list: &SkipList) -> Result<(Entry, Option<ClassOutcome>)> {
    if !entry.is_class() {
        return Ok((entry, None));
    }
    let (bytes, mut outcome) = desugar_class(&entry.data, skip_list)
        .with_context(|| format!("failed to desugar {}", entry.path))?;
    outcome.path = entry.path.clone();
    entry.data = bytes;
    Ok((entry, Some(outcome)))
}

/// Run every stage over one class file and re-emit it.
pub(crate) fn desugar_class(data: &[u8], skip_list: &SkipList) -> Result<(Vec<u8>, ClassOutcome)> {
    let mut class = parse_class(data).context("failed to parse class file")?;
    let class_name = class.name()?.into_owned();
    let skipped = skip_list.should_skip(&class_name);

    let stripped_attributes = strip_nest_attributes(&mut class);
    let (removed_bodies, rewritten_call_sites) = if skipped {
        (strip_method_bodies(&mut class), 0)
    } else {
        (0, neutralize_class(&mut class, &class_name)?)
    };

    if skipped {
        info!("removed {removed_bodies} method bodies from skipped class {class_name}");
    }
    if rewritten_call_sites > 0 {
        debug!("rewrote {rewritten_call_sites} MethodHandle call site(s) in {class_name}");
    }
    if stripped_attributes > 0 {
        debug!("stripped {stripped_attributes} nest attribute(s) from {class_name}");
    }

    let bytes =
        class_to_bytes(&class).with_context(|| format!("failed to serialize {class_name}"))?;
    parse_class(&bytes).with_context(|| format!("re-emitted {class_name} does not parse"))?;

    Ok((
        bytes,
        ClassOutcome {
            path: String::new(),
            class_name,
            skipped,
            rewritten_call_sites,
            removed_bodies,
            stripped_attributes,
        },
    ))
}

fn neutralize_class(class: &mut ClassFile, class_name: &str) -> Result<usize> {
    let pool = &class.constant_pool;
    let mut total = 0;
    for method in &mut class.methods {
        total += neutralize_method(pool, method).with_context(|| {
            format!(
                "failed to rewrite {class_name}.{}",
                method_label(pool, method)
            )
        })?;
    }
    Ok(total)
}

fn method_label(pool: &ConstantPool, method: &Method) -> String {
    match (method.name(pool), method.descriptor(pool)) {
        (Ok(name), Ok(descriptor)) => format!("{name}{descriptor}"),
        _ => "<unnamed method>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neutralize::METHOD_HANDLE;
    use crate::opcodes::{ARETURN, POP, RETURN};
    use crate::testutil::{ClassBuilder, invokevirtual, method_code};
    use zip::CompressionMethod;

    fn class_entry(path: &str, data: Vec<u8>) -> Entry {
        Entry {
            path: path.to_string(),
            is_dir: false,
            data,
            compression: CompressionMethod::Deflated,
        }
    }

    fn handle_user(name: &str) -> Vec<u8> {
        let mut builder = ClassBuilder::new(name);
        let call = builder.method_ref(
            METHOD_HANDLE,
            "invoke",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
        );
        let mut body = vec![0x2a, 0x2b];
        body.extend(invokevirtual(call));
        body.push(ARETURN);
        builder.method(
            "call",
            "(Ljava/lang/invoke/MethodHandle;Ljava/lang/Object;)Ljava/lang/Object;",
            2,
            2,
            body,
        );
        builder.to_bytes()
    }

    #[test]
    fn nest_attributes_go_and_plain_bodies_stay_identical() {
        let mut builder = ClassBuilder::new("com/example/Outer");
        builder
            .nest_host("com/example/Top")
            .nest_members(&["com/example/Outer$Inner"])
            .method("run", "()V", 1, 1, vec![0x2a, POP, RETURN]);
        let input = builder.build();

        let (bytes, outcome) =
            desugar_class(&builder.to_bytes(), &SkipList::default()).expect("desugar");

        let output = parse_class(&bytes).expect("reparse");
        assert!(output.attributes.is_empty());
        assert_eq!(outcome.stripped_attributes, 2);
        assert_eq!(outcome.rewritten_call_sites, 0);
        assert_eq!(output.methods[0].attributes, input.methods[0].attributes);
    }

    #[test]
    fn matched_calls_are_rewritten() {
        let input = handle_user("com/example/User");

        let (bytes, outcome) = desugar_class(&input, &SkipList::default()).expect("desugar");

        assert_eq!(outcome.class_name, "com/example/User");
        assert_eq!(outcome.rewritten_call_sites, 1);
        assert!(!outcome.skipped);
        let output = parse_class(&bytes).expect("reparse");
        let code = method_code(&output, "call").expect("body");
        assert_eq!(code.code, vec![0x2a, 0x2b, POP, ARETURN]);
    }

    #[test]
    fn skipped_classes_lose_every_body_and_are_not_rewritten() {
        let skip = SkipList::new(vec!["com/vendor/".to_string()]);

        let (bytes, outcome) =
            desugar_class(&handle_user("com/vendor/User"), &skip).expect("desugar");

        assert!(outcome.skipped);
        assert_eq!(outcome.rewritten_call_sites, 0);
        assert_eq!(outcome.removed_bodies, 1);
        let output = parse_class(&bytes).expect("reparse");
        assert_eq!(output.methods.len(), 1);
        assert!(method_code(&output, "call").is_none());
    }

    #[test]
    fn entries_keep_their_order_and_resources_pass_through() {
        let resource = b"Manifest-Version: 1.0\n".to_vec();
        let entries = vec![
            Entry {
                path: "META-INF/".to_string(),
                is_dir: true,
                data: Vec::new(),
                compression: CompressionMethod::Stored,
            },
            class_entry("META-INF/MANIFEST.MF", resource.clone()),
            class_entry("com/example/A.class", handle_user("com/example/A")),
            class_entry("com/example/B.class", handle_user("com/example/B")),
        ];

        let output = desugar_entries(entries, &SkipList::default()).expect("desugar entries");

        let paths: Vec<_> = output.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "META-INF/",
                "META-INF/MANIFEST.MF",
                "com/example/A.class",
                "com/example/B.class"
            ]
        );
        assert_eq!(output.entries[1].data, resource);
        assert_eq!(output.classes.len(), 2);
        assert_eq!(output.classes[0].path, "com/example/A.class");
        assert_eq!(output.classes[1].class_name, "com/example/B");
    }

    #[test]
    fn malformed_class_entry_aborts_with_its_path() {
        let entries = vec![
            class_entry("com/example/A.class", handle_user("com/example/A")),
            class_entry("com/example/Broken.class", b"nope".to_vec()),
        ];

        let error = desugar_entries(entries, &SkipList::default()).expect_err("malformed");

        assert!(format!("{error:#}").contains("com/example/Broken.class"));
    }

    #[test]
    fn bad_descriptor_names_class_and_method() {
        let mut builder = ClassBuilder::new("com/example/Bad");
        let call = builder.method_ref(METHOD_HANDLE, "invokeExact", "(");
        let mut body = vec![0x2a];
        body.extend(invokevirtual(call));
        body.push(RETURN);
        builder.method("broken", "()V", 1, 1, body);

        let error = desugar_class(&builder.to_bytes(), &SkipList::default()).expect_err("bad");

        let message = format!("{error:#}");
        assert!(message.contains("com/example/Bad.broken()V"), "{message}");
    }
}
