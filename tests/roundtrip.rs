//! Translation must reach a fixed point after one round: whatever either
//! emitter produces re-parses to the same tree, so a second trip through
//! the other language changes nothing.

use jsesi::{compile_str, decompile_str, CompileOptions};

fn compile(source: &str) -> String {
    let opts = CompileOptions { warn: false, ..CompileOptions::default() };
    compile_str(source, "<roundtrip>", &opts)
        .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", source, e))
}

fn decompile(source: &str) -> String {
    decompile_str(source, "<roundtrip>")
        .unwrap_or_else(|e| panic!("decompile failed for {:?}: {}", source, e))
}

/// `JS → ESI → JS → ESI` settles after the first round.
fn js_fixed_point(source: &str) {
    let esi1 = compile(source);
    let js1 = decompile(&esi1);
    let esi2 = compile(&js1);
    assert_eq!(esi1, esi2, "esi not stable for {:?} (via {:?})", source, js1);
    let js2 = decompile(&esi2);
    assert_eq!(js1, js2, "js not stable for {:?}", source);
}

/// `ESI → JS → ESI → JS` settles after the first round.
fn esi_fixed_point(source: &str) {
    let js1 = decompile(source);
    let esi1 = compile(&js1);
    let js2 = decompile(&esi1);
    assert_eq!(js1, js2, "js not stable for {:?} (via {:?})", source, esi1);
    let esi2 = compile(&js2);
    assert_eq!(esi1, esi2, "esi not stable for {:?}", source);
}

#[test]
fn assignments() {
    js_fixed_point("v = 1;");
    js_fixed_point("greeting = 'hello' + name;");
    js_fixed_point("d['k'] = 2; d['other'] = d['k'] + 1;");
    js_fixed_point("total += 1;");
}

#[test]
fn conditionals_with_match_names() {
    js_fixed_point(
        "if (HTTP_HOST matches 'www(.*)' as m) { v = 1; w = 2; } \
         else if (a == 'x') v = 2; else v = 3;",
    );
}

#[test]
fn loops() {
    js_fixed_point("for (let x of list) { total += x; }");
    js_fixed_point("for (i = 0; i < 5; i += 1) v = i;");
}

#[test]
fn try_and_include() {
    js_fixed_point("try { include(src='/a'); } except { v = 1; }");
    js_fixed_point(
        "include(src='/frag?h=' + HTTP_HOST, maxWait=300, \
         appendHeader=['X-A: 1', 'X-B: 2']);",
    );
}

#[test]
fn functions() {
    js_fixed_point("function f(a, b) { t = a; return t + b; } v = f(1, 2);");
}

#[test]
fn output_forms() {
    js_fixed_point("print('hello ');");
    js_fixed_point("printv('host=' + HTTP_HOST);");
    js_fixed_point("printraw('<esi:debug/>');");
}

#[test]
fn ternaries() {
    js_fixed_point("v = c ? 'a' : 'b';");
    js_fixed_point("v = d['k'] ? 1 : 2;");
    js_fixed_point("v = 1 + (c ? 2 : 3);");
}

#[test]
fn collections() {
    js_fixed_point("l = [1, 2, 'a', [3, 4]];");
    js_fixed_point("d = {'k': 1, 'j': 'x'};");
    js_fixed_point("r = [1..5];");
}

#[test]
fn comments_survive_without_gluing() {
    js_fixed_point("//### first\n//### second line\nv = 1;");
    js_fixed_point("//### one\n//\n//### two\nv = 1;");
}

#[test]
fn operators_and_precedence() {
    js_fixed_point("v = a + b * c;");
    js_fixed_point("v = (a + b) * c;");
    js_fixed_point("m = x & 3 | y << 2;");
    js_fixed_point("n = ! (a == 1);");
    js_fixed_point("t = s has 'frag' && u has_i 'other';");
}

#[test]
fn esi_side_assignments() {
    esi_fixed_point("<esi:assign name=\"greeting\" value=\"hello\"/>");
    esi_fixed_point("<esi:assign name=\"d{'k'}\" value=\"$(d{'j'})+1\"/>");
}

#[test]
fn esi_side_choose() {
    esi_fixed_point(
        "<esi:choose><esi:when test=\"$(HTTP_COOKIE{'id'}) == 'a'\">\
         <esi:include src=\"/a\"/></esi:when>\
         <esi:otherwise>fallback</esi:otherwise></esi:choose>",
    );
}

#[test]
fn esi_side_vars() {
    esi_fixed_point("<esi:vars>$(d{'k'}|'def')</esi:vars>");
    esi_fixed_point("<esi:vars name=\"HTTP_HOST\"/>");
}

#[test]
fn esi_side_functions() {
    esi_fixed_point(
        "<esi:function name=\"add\"><esi:return value=\"$(ARGS{0})+$(ARGS{1})\"/>\
         </esi:function>",
    );
}

#[test]
fn esi_side_raw_text_with_escapes() {
    esi_fixed_point("plain text then <b>markup</b>");
    esi_fixed_point("cost \\$5 and \\\\ stay literal");
}

#[test]
fn esi_side_foreach() {
    esi_fixed_point(
        "<esi:foreach collection=\"$(list)\" item=\"x\"><esi:break/></esi:foreach>",
    );
}

#[test]
fn esi_side_include_dca_quirk() {
    esi_fixed_point("<esi:include src=\"/a\" dca=\"noesi->esi\"/>");
}

#[test]
fn esi_side_try() {
    esi_fixed_point(
        "<esi:try><esi:attempt><esi:include src=\"/a\"/></esi:attempt>\
         <esi:except><esi:assign name=\"v\" value=\"1\"/></esi:except></esi:try>",
    );
}
