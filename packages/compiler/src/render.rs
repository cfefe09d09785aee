//! Default-value rendering.
//!
//! Produces the wire bytes a data model serializes to when every element
//! holds its default value. Rendering works on a clone with arrays expanded
//! and then settles relations and fixups:
//!
//! 1. render every element from its default;
//! 2. recompute all size/count/offset relations from that rendering until
//!    nothing changes;
//! 3. recompute all fixups the same way, each over a rendering where the
//!    fixup's own element holds its default.
//!
//! Every value is computed from a complete rendering, so the result does not
//! depend on whether a consumer is declared before or after its producer.

use std::collections::HashMap;

use crate::coercion;
use crate::config::MAX_DEFAULT_LENGTH;
use crate::dom::{
    DataElement, DataModel, ElementKind, ElementPath, Endian, LengthType, RelationKind,
    StringEncoding, Variant,
};
use crate::error::{CompileError, Result};
use crate::expression::{EvalScope, ExpressionEvaluator, ScriptValue};

/// Upper bound on relation and fixup settling passes.
const MAX_PASSES: usize = 16;

/// Concrete location of a rendered element.
///
/// Like [`ElementPath`], but each array copy gets its own `name[i]` segment.
type Location = Vec<String>;

/// An element carrying relations or a fixup.
struct Site {
    location: Location,
    path: ElementPath,
}

/// Render the default bytes of `model`.
///
/// The model must have been bound.
pub fn render_model(model: &DataModel, evaluator: &dyn ExpressionEvaluator) -> Result<Vec<u8>> {
    let mut root = model.root.clone();
    expand_arrays(&mut root);

    let mut renderer = Renderer {
        root: &root,
        evaluator,
        overrides: HashMap::new(),
        spans: HashMap::new(),
        sites: Vec::new(),
    };

    let mut output = renderer.render()?;
    for pass in 0..MAX_PASSES {
        if !renderer.settle_relations()? {
            break;
        }
        tracing::trace!(pass, "Relations changed, rendering again");
        output = renderer.render()?;
    }
    for pass in 0..MAX_PASSES {
        if !renderer.settle_fixups()? {
            break;
        }
        tracing::trace!(pass, "Fixups changed, rendering again");
        output = renderer.render()?;
    }

    tracing::debug!(model = %model.root.name, bytes = output.len(), "Rendered default value");
    Ok(output)
}

fn expand_arrays(element: &mut DataElement) {
    if let ElementKind::Array(array) = &mut element.kind {
        expand_arrays(&mut array.template);
        array.ensure_expanded();
        return;
    }
    if let Some(children) = element.children_mut() {
        for child in children.iter_mut() {
            expand_arrays(child);
        }
    }
}

struct Renderer<'r> {
    root: &'r DataElement,
    evaluator: &'r dyn ExpressionEvaluator,
    /// Values computed by relations and fixups.
    overrides: HashMap<Location, Variant>,
    /// Start offset and length of every element in the last rendering.
    spans: HashMap<Location, (usize, usize)>,
    sites: Vec<Site>,
}

impl<'r> Renderer<'r> {
    fn render(&mut self) -> Result<Vec<u8>> {
        self.sites.clear();
        let root = self.root;
        self.element(root, Vec::new(), ElementPath::root(), 0)
    }

    fn element(
        &mut self,
        element: &DataElement,
        location: Location,
        path: ElementPath,
        start: usize,
    ) -> Result<Vec<u8>> {
        self.spans.insert(location.clone(), (start, 0));

        let consumer = element.unwrap_array();
        if !consumer.relations.is_empty() || consumer.fixup.is_some() {
            self.sites.push(Site {
                location: location.clone(),
                path: path.clone(),
            });
        }

        let value = self
            .overrides
            .get(&location)
            .or(element.default_value.as_ref())
            .cloned();

        let mut bytes = match &element.kind {
            ElementKind::Block(children) => {
                self.sequence(children.iter(), &location, &path, start)?
            }
            ElementKind::Choice(choice) => {
                self.sequence(choice.alternatives.first(), &location, &path, start)?
            }
            ElementKind::Array(array) => {
                let mut bytes = Vec::new();
                if let Some(copies) = array.expanded() {
                    for (index, copy) in copies.iter().enumerate() {
                        let mut copy_location = location.clone();
                        if let Some(last) = copy_location.last_mut() {
                            *last = format!("{}[{index}]", element.name);
                        }
                        let rendered =
                            self.element(copy, copy_location, path.clone(), start + bytes.len())?;
                        bytes.extend(rendered);
                    }
                }
                bytes
            }
            ElementKind::Flags(flags) => {
                let mut raw = value.as_ref().and_then(Variant::as_i128).unwrap_or(0);
                for flag in &flags.flags {
                    let ElementKind::Flag(spec) = &flag.kind else {
                        continue;
                    };
                    let child = extend(&location, &flag.name);
                    self.spans.insert(child.clone(), (start, 0));
                    let flag_value = self
                        .overrides
                        .get(&child)
                        .or(flag.default_value.as_ref())
                        .and_then(Variant::as_i128)
                        .unwrap_or(0);
                    let mask = (1i128 << spec.size) - 1;
                    let shift = flags.size - spec.bit_offset - spec.size;
                    raw &= !(mask << shift);
                    raw |= (flag_value & mask) << shift;
                }
                integer_bytes(raw, flags.size, flags.endian)
            }
            ElementKind::Number(spec) => integer_bytes(
                value.as_ref().and_then(Variant::as_i128).unwrap_or(0),
                spec.size,
                spec.endian,
            ),
            ElementKind::Flag(spec) => integer_bytes(
                value.as_ref().and_then(Variant::as_i128).unwrap_or(0),
                spec.size,
                Endian::Big,
            ),
            ElementKind::Double(spec) => {
                let number = match &value {
                    Some(Variant::Double(d)) => *d,
                    Some(other) => other.as_i128().map_or(0.0, |i| i as f64),
                    None => 0.0,
                };
                double_bytes(number, spec.size, spec.endian)
            }
            ElementKind::String(spec) => {
                let text = value.map(|v| v.to_string()).unwrap_or_default();
                let mut bytes = encode_string(&text, spec.encoding);
                let unit = encode_string(&spec.pad_character.to_string(), spec.encoding);
                if let Some(length) = element.length {
                    let target = match element.length_type {
                        LengthType::Chars => length.saturating_mul(unit.len() as u64),
                        LengthType::Bits => length.div_ceil(8),
                        LengthType::Bytes => length,
                    };
                    let target = declared_len(element, target)?;
                    while bytes.len() < target && !unit.is_empty() {
                        bytes.extend_from_slice(&unit);
                    }
                    bytes.truncate(target);
                } else if spec.null_terminated {
                    bytes.extend(encode_string("\0", spec.encoding));
                }
                bytes
            }
            ElementKind::Blob => value.map(|v| v.to_bytes()).unwrap_or_default(),
            ElementKind::Padding(spec) => {
                let anchor = match &spec.aligned_to_path {
                    Some(target) => self.locate(target, &location)?,
                    None => location[..location.len().saturating_sub(1)].to_vec(),
                };
                let anchor_start = self.spans.get(&anchor).map_or(0, |span| span.0);
                let used_bits = (start.saturating_sub(anchor_start) as u64) * 8;
                let alignment = u64::from(spec.alignment);
                let pad_bits = (alignment - used_bits % alignment) % alignment;
                let pad = bits_to_bytes(pad_bits).max(declared_len(element, spec.min_size)?);
                vec![0; pad]
            }
        };

        if let Some(chain) = &element.transformer {
            bytes = chain.encode(&bytes).map_err(|reason| CompileError::Render {
                element: element.name.clone(),
                reason,
            })?;
        }

        self.spans.insert(location, (start, bytes.len()));
        Ok(bytes)
    }

    fn sequence<'e>(
        &mut self,
        children: impl IntoIterator<Item = &'e DataElement>,
        location: &Location,
        path: &ElementPath,
        start: usize,
    ) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for child in children {
            let rendered = self.element(
                child,
                extend(location, &child.name),
                path.child(&child.name),
                start + bytes.len(),
            )?;
            bytes.extend(rendered);
        }
        Ok(bytes)
    }

    /// Map a bound path to the location it denotes for a consumer.
    ///
    /// Arrays the consumer sits in resolve to the consumer's own copy; other
    /// arrays resolve to their first copy.
    fn locate(&self, target: &ElementPath, consumer: &Location) -> Result<Location> {
        let segments = target.segments();
        let mut location = Vec::with_capacity(segments.len());
        for (depth, segment) in segments.iter().enumerate() {
            let is_array = self
                .root
                .find_path(&segments[..=depth])
                .is_some_and(|e| matches!(e.kind, ElementKind::Array(_)));
            if !is_array || depth + 1 == segments.len() {
                location.push(segment.clone());
                continue;
            }
            let prefix = format!("{segment}[");
            let own_copy = consumer
                .get(depth)
                .filter(|s| consumer[..depth] == location[..] && s.starts_with(&prefix));
            location.push(own_copy.cloned().unwrap_or_else(|| format!("{segment}[0]")));
        }
        Ok(location)
    }

    fn element_at(&self, site: &Site) -> Result<&'r DataElement> {
        self.root
            .find_path(site.path.segments())
            .map(DataElement::unwrap_array)
            .ok_or_else(|| CompileError::Render {
                element: site.path.to_string(),
                reason: "element not found".to_string(),
            })
    }

    fn set(&mut self, location: Location, value: Variant) -> bool {
        if self.overrides.get(&location) == Some(&value) {
            return false;
        }
        self.overrides.insert(location, value);
        true
    }

    fn settle_relations(&mut self) -> Result<bool> {
        let mut changed = false;
        let sites = std::mem::take(&mut self.sites);
        for site in &sites {
            let element = self.element_at(site)?;
            for relation in &element.relations {
                let target = relation.target.as_ref().ok_or_else(|| CompileError::Render {
                    element: element.name.clone(),
                    reason: format!("{} relation of '{}' is not bound", relation.kind.as_str(), relation.of),
                })?;
                let producer = self.locate(target, &site.location)?;

                let (variable, amount) = match relation.kind {
                    RelationKind::Size => {
                        let length = self.spans.get(&producer).map_or(0, |span| span.1) as i64;
                        let amount = match relation.length_type {
                            LengthType::Bits => length * 8,
                            LengthType::Bytes | LengthType::Chars => length,
                        };
                        ("size", amount)
                    }
                    RelationKind::Count => {
                        let count = match self.root.find_path(target.segments()).map(|e| &e.kind) {
                            Some(ElementKind::Array(array)) => {
                                array.expanded().map_or(array.occurs as usize, |c| c.len())
                            }
                            _ => {
                                return Err(CompileError::Render {
                                    element: element.name.clone(),
                                    reason: format!("count relation target '{}' is not an array", relation.of),
                                })
                            }
                        };
                        ("count", count as i64)
                    }
                    RelationKind::Offset => {
                        let position = self.spans.get(&producer).map_or(0, |span| span.0);
                        let anchor = match (&relation.relative_to_path, relation.relative) {
                            (Some(anchor), _) => {
                                let anchor = self.locate(anchor, &site.location)?;
                                self.spans.get(&anchor).map_or(0, |span| span.0)
                            }
                            (None, true) => self.spans.get(&site.location).map_or(0, |span| span.0),
                            (None, false) => 0,
                        };
                        ("offset", position as i64 - anchor as i64)
                    }
                };

                let raw = match &relation.expression_set {
                    Some(expression) => {
                        let scope = EvalScope {
                            element: Some(element),
                            ..EvalScope::default()
                        }
                        .with_var(variable, ScriptValue::Int(amount));
                        self.evaluator
                            .eval(expression, &scope)
                            .map_err(|reason| CompileError::Render {
                                element: element.name.clone(),
                                reason: format!("expressionSet failed: {reason}"),
                            })?
                            .into_variant()
                            .unwrap_or(Variant::Int(0))
                    }
                    None => Variant::Int(amount),
                };
                let value = coercion::sanitize(element, raw).map_err(|reason| CompileError::Render {
                    element: element.name.clone(),
                    reason,
                })?;
                changed |= self.set(site.location.clone(), value);
            }
        }
        self.sites = sites;
        Ok(changed)
    }

    fn settle_fixups(&mut self) -> Result<bool> {
        let mut changed = false;
        let sites = std::mem::take(&mut self.sites);
        for site in &sites {
            let element = self.element_at(site)?;
            let Some(fixup) = &element.fixup else {
                continue;
            };

            // The fixup's own element holds its default while it is computed.
            let previous = self.overrides.remove(&site.location);
            let output = self.render()?;
            if let Some(previous) = previous {
                self.overrides.insert(site.location.clone(), previous);
            }

            let mut data = Vec::new();
            for param in &fixup.element_refs {
                let target = fixup.binding(param).ok_or_else(|| CompileError::Render {
                    element: element.name.clone(),
                    reason: format!("fixup parameter '{param}' is not bound"),
                })?;
                let location = self.locate(target, &site.location)?;
                let (start, length) = self.spans.get(&location).copied().unwrap_or((0, 0));
                data.extend_from_slice(output.get(start..start + length).unwrap_or_default());
            }

            let value = coercion::sanitize(element, fixup.instance.compute(&data)).map_err(
                |reason| CompileError::Render {
                    element: element.name.clone(),
                    reason,
                },
            )?;
            changed |= self.set(site.location.clone(), value);
        }
        self.sites = sites;
        Ok(changed)
    }
}

fn extend(location: &Location, name: &str) -> Location {
    let mut child = location.clone();
    child.push(name.to_string());
    child
}

/// Byte count of a declared length, bounded by [`MAX_DEFAULT_LENGTH`].
fn declared_len(element: &DataElement, bytes: u64) -> Result<usize> {
    if bytes > MAX_DEFAULT_LENGTH {
        return Err(CompileError::Render {
            element: element.name.clone(),
            reason: format!("length {bytes} bytes exceeds the limit of {MAX_DEFAULT_LENGTH} bytes"),
        });
    }
    usize::try_from(bytes).map_err(|_| CompileError::Render {
        element: element.name.clone(),
        reason: format!("length {bytes} bytes is too large"),
    })
}

fn bits_to_bytes(bits: u64) -> usize {
    usize::try_from(bits.div_ceil(8)).unwrap_or(usize::MAX)
}

fn integer_bytes(value: i128, size: u32, endian: Endian) -> Vec<u8> {
    let width = bits_to_bytes(u64::from(size));
    let mask = if size >= 128 { -1 } else { (1i128 << size) - 1 };
    let raw = (value & mask) as u128;
    let be = raw.to_be_bytes();
    let mut bytes = be[be.len() - width..].to_vec();
    if endian == Endian::Little {
        bytes.reverse();
    }
    bytes
}

fn double_bytes(value: f64, size: u32, endian: Endian) -> Vec<u8> {
    let mut bytes = if size == 32 {
        (value as f32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    };
    if endian == Endian::Little {
        bytes.reverse();
    }
    bytes
}

fn encode_string(text: &str, encoding: StringEncoding) -> Vec<u8> {
    match encoding {
        StringEncoding::Ascii | StringEncoding::Utf7 | StringEncoding::Utf8 => {
            text.as_bytes().to_vec()
        }
        StringEncoding::Utf16 => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        StringEncoding::Utf16be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        StringEncoding::Utf32 => text.chars().flat_map(|c| u32::from(c).to_le_bytes()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder;
    use crate::builder::DataElementBuilder;
    use crate::dom::Dom;
    use crate::expression::SimpleEvaluator;
    use crate::registry::Registry;
    use crate::session::CompileSession;
    use pretty_assertions::assert_eq;
    use roxmltree::Document;

    fn render(xml: &str) -> Result<Vec<u8>> {
        let doc = Document::parse(xml).unwrap();
        let registry = Registry::with_builtins();
        let dom = Dom::default();
        let mut session = CompileSession::new();
        let mut builder = DataElementBuilder::new(&registry, &dom, &SimpleEvaluator, &mut session);
        let mut model = builder.build_data_model(doc.root_element())?;
        binder::bind(&mut model)?;
        render_model(&model, &SimpleEvaluator)
    }

    #[test]
    fn test_numbers_respect_endian() {
        let bytes = render(
            r#"<DataModel name="M">
                <Number name="a" size="16" value="258"/>
                <Number name="b" size="16" endian="big" value="258"/>
                <Number name="c" size="8" signed="true" value="-1"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x01, 0x02, 0xFF]);
    }

    #[test]
    fn test_size_relation_before_and_after_producer() {
        let before = render(
            r#"<DataModel name="M">
                <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                <String name="data" value="hello"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(before, b"\x05hello".to_vec());

        let after = render(
            r#"<DataModel name="M">
                <String name="data" value="hello"/>
                <Number name="len" size="8"><Relation type="size" of="data" lengthType="bits"/></Number>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(after, b"hello\x28".to_vec());
    }

    #[test]
    fn test_expression_set_and_count() {
        let bytes = render(
            r#"<DataModel name="M">
                <Number name="count" size="8"><Relation type="count" of="items"/></Number>
                <Number name="len" size="8"><Relation type="size" of="items" expressionSet="size / 2"/></Number>
                <Number name="items" size="16" occurs="3" value="1"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, vec![3, 3, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_offset_relation() {
        let bytes = render(
            r#"<DataModel name="M">
                <Number name="off" size="8"><Relation type="offset" of="tail"/></Number>
                <Blob name="pad" value="abc"/>
                <Blob name="tail" value="z"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, b"\x04abcz".to_vec());
    }

    #[test]
    fn test_fixup_over_region_containing_itself() {
        let bytes = render(
            r#"<DataModel name="M">
                <Block name="body">
                    <Blob name="data" valueType="hex" value="0102"/>
                    <Number name="sum" size="16" endian="big">
                        <Fixup class="Fletcher16Fixup"><Param name="ref" value="body"/></Fixup>
                    </Number>
                </Block>
            </DataModel>"#,
        )
        .unwrap();
        // Computed over 01 02 00 00 with the checksum at its default.
        assert_eq!(bytes, vec![0x01, 0x02, 0x0A, 0x03]);
    }

    #[test]
    fn test_flags_and_transformers() {
        let bytes = render(
            r#"<DataModel name="M">
                <Flags name="f" size="8" endian="big">
                    <Flag name="hi" position="0" size="4" value="10"/>
                    <Flag name="lo" position="4" size="4" value="5"/>
                </Flags>
                <Blob name="b" value="hi"><Transformer class="Hex"/></Blob>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, vec![0xA5, b'6', b'8', b'6', b'9']);
    }

    #[test]
    fn test_padding_aligns_parent() {
        let bytes = render(
            r#"<DataModel name="M">
                <Blob name="b" value="abc"/>
                <Padding name="p" alignment="32"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, b"abc\0".to_vec());
    }

    #[test]
    fn test_string_padding_and_termination() {
        let bytes = render(
            r#"<DataModel name="M">
                <String name="a" value="ab" length="4" padCharacter="."/>
                <String name="b" value="x" nullTerminated="true"/>
                <String name="c" value="A" type="utf16be"/>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(bytes, b"ab..x\0\0A".to_vec());
    }

    #[test]
    fn test_oversized_declared_lengths_fail() {
        let err = render(
            r#"<DataModel name="M">
                <String name="s" value="a" length="18446744073709551615" lengthType="chars"/>
            </DataModel>"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Render { ref element, .. } if element == "s"), "{err}");

        let err = render(
            r#"<DataModel name="M">
                <Padding name="p" minSize="1099511627776"/>
            </DataModel>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds the limit"), "{err}");
    }
}
